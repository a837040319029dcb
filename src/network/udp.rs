//! UDP socket setup
//!
//! Multicast groups are joined on the wildcard address of the matching
//! family with address reuse enabled, so several receivers on one host can
//! listen to the same group.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::config::Endpoint;
use crate::error::NetworkError;

/// Kernel receive buffer requested for the audio socket
pub const RECV_BUFFER_SIZE: usize = 256 * 1024;

/// Resolve an endpoint to its first socket address
pub fn resolve(endpoint: &Endpoint) -> Result<SocketAddr, NetworkError> {
    (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::Resolve(format!("{}: {}", endpoint, e)))?
        .next()
        .ok_or_else(|| NetworkError::Resolve(endpoint.to_string()))
}

/// Create a bound receive socket for `endpoint`.
///
/// Reads time out after `read_timeout` so the owning thread can notice a
/// shutdown request.
pub fn bind_receiver(endpoint: &Endpoint, read_timeout: Duration) -> Result<UdpSocket, NetworkError> {
    let addr = resolve(endpoint)?;
    let group = addr.ip();
    let is_multicast = group.is_multicast();

    let listen = if is_multicast {
        let any = match group {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        SocketAddr::new(any, addr.port())
    } else {
        addr
    };

    let socket = Socket::new(Domain::for_address(listen), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    if is_multicast {
        socket
            .set_reuse_address(true)
            .map_err(|e| NetworkError::BindFailed(format!("reuse_address: {}", e)))?;
    }

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        tracing::warn!("Could not set receive buffer size: {}", e);
    }

    socket
        .bind(&listen.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", listen, e)))?;

    if is_multicast {
        match group {
            IpAddr::V4(v4) => socket.join_multicast_v4(&v4, &Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(v6) => socket.join_multicast_v6(&v6, 0),
        }
        .map_err(|e| NetworkError::JoinFailed(format!("{}: {}", group, e)))?;
        tracing::info!("Joined multicast group {} on port {}", group, addr.port());
    }

    socket
        .set_read_timeout(Some(read_timeout))
        .map_err(|e| NetworkError::BindFailed(format!("read timeout: {}", e)))?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_literal() {
        let addr = resolve(&Endpoint::new("127.0.0.1", 4010)).unwrap();
        assert_eq!(addr, "127.0.0.1:4010".parse().unwrap());
    }

    #[test]
    fn test_resolve_failure() {
        assert!(matches!(
            resolve(&Endpoint::new("not a host name", 1)),
            Err(NetworkError::Resolve(_))
        ));
    }

    #[test]
    fn test_bind_unicast_ephemeral() {
        let socket = bind_receiver(&Endpoint::new("127.0.0.1", 0), Duration::from_millis(20)).unwrap();
        let local = socket.local_addr().unwrap();
        assert!(local.ip().is_loopback());
        assert_ne!(local.port(), 0);
        assert_eq!(socket.read_timeout().unwrap(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_read_times_out() {
        let socket = bind_receiver(&Endpoint::new("127.0.0.1", 0), Duration::from_millis(10)).unwrap();
        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn test_bind_conflict_fails() {
        let first = bind_receiver(&Endpoint::new("127.0.0.1", 0), Duration::from_millis(10)).unwrap();
        let port = first.local_addr().unwrap().port();
        let second = bind_receiver(&Endpoint::new("127.0.0.1", port), Duration::from_millis(10));
        assert!(matches!(second, Err(NetworkError::BindFailed(_))));
    }
}

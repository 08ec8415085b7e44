//! Socket options shared by the listening and dialing sides.

use crate::logger::LoggerRef;
use tokio::net::TcpSocket;

/// Binds `socket` to a named network interface.
///
/// Only Linux supports binding a socket to a device. Elsewhere the request is
/// logged and ignored.
#[cfg(target_os = "linux")]
pub(crate) fn bind_interface(
    socket: &TcpSocket,
    interface: Option<&str>,
    _logger: &LoggerRef,
) -> std::io::Result<()> {
    match interface {
        Some(name) => socket.bind_device(Some(name.as_bytes())),
        None => Ok(()),
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn bind_interface(
    _socket: &TcpSocket,
    interface: Option<&str>,
    logger: &LoggerRef,
) -> std::io::Result<()> {
    if let Some(name) = interface {
        logger.warn(&format!(
            "Binding to interface {} is only supported on Linux; ignoring",
            name
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::default_logger;

    #[tokio::test]
    async fn test_no_interface_is_a_no_op() {
        let socket = TcpSocket::new_v4().unwrap();
        bind_interface(&socket, None, &default_logger()).unwrap();

        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(socket.listen(1).is_ok());
    }
}

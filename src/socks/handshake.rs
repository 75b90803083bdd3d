//! Async drivers for the SOCKS5 state machine

use super::machine::{Handshake, Step};
use super::types::Socks5Request;
use crate::error::{RelayError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Feed the machine from `stream` until it yields something other than
/// [`Step::Continue`]
async fn drive<S>(stream: &mut S, machine: &mut Handshake) -> Result<Step>
where
    S: AsyncRead + Unpin,
{
    loop {
        let stage = machine.state().stage();
        let mut buf = vec![0u8; machine.wants()];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| RelayError::from_read(e, stage))?;

        match machine.advance(&buf)? {
            Step::Continue => continue,
            step => return Ok(step),
        }
    }
}

/// Run the greeting and answer "no authentication"
///
/// Returns the machine positioned at the request header.
pub async fn negotiate<S>(stream: &mut S) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut machine = Handshake::new();

    match drive(stream, &mut machine).await? {
        Step::Reply(reply) => {
            stream.write_all(&reply).await?;
            stream.flush().await?;
            machine.reply_sent();
            debug!("SOCKS5 greeting negotiated");
            Ok(machine)
        }
        other => Err(RelayError::MalformedInput(format!(
            "unexpected handshake step during greeting: {:?}",
            other
        ))),
    }
}

/// Read the connection request following a negotiated greeting
pub async fn read_request<S>(stream: &mut S, machine: &mut Handshake) -> Result<Socks5Request>
where
    S: AsyncRead + Unpin,
{
    match drive(stream, machine).await? {
        Step::Request(request) => {
            debug!("Parsed SOCKS5 {} request to {}", request.command, request);
            Ok(request)
        }
        other => Err(RelayError::MalformedInput(format!(
            "unexpected handshake step during request: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Unsupported;
    use tokio::io::duplex;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_negotiate_then_request() {
        let (mut client, mut server) = duplex(1024);

        let server_task = tokio::spawn(async move {
            let mut machine = negotiate(&mut server).await?;
            read_request(&mut server, &mut machine).await
        });

        client.write_all(&[5, 2, 0, 2]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [5, 0]);

        client
            .write_all(&[5, 1, 0, 3, 4, b't', b'e', b's', b't', 0x1F, 0x90])
            .await
            .unwrap();

        let request = server_task.await.unwrap().unwrap();
        assert_eq!(request, Socks5Request::domain("test", 8080));
    }

    #[tokio::test]
    async fn test_negotiate_short_read() {
        let mut mock = Builder::new().read(&[5]).build();
        let result = negotiate(&mut mock).await;
        assert!(matches!(
            result,
            Err(RelayError::ShortRead { stage: "greeting" })
        ));
    }

    #[tokio::test]
    async fn test_negotiate_wrong_version_writes_nothing() {
        let mut mock = Builder::new().read(&[4, 1]).build();
        let result = negotiate(&mut mock).await;
        assert!(matches!(result, Err(RelayError::ProtocolVersion(4))));
    }

    #[tokio::test]
    async fn test_read_request_ipv6_unsupported() {
        let mut mock = Builder::new().read(&[5, 1, 0, 4]).build();
        let mut machine = Handshake::for_request();
        let result = read_request(&mut mock, &mut machine).await;
        assert!(matches!(
            result,
            Err(RelayError::Unsupported(Unsupported::AddressType(4)))
        ));
    }

    #[tokio::test]
    async fn test_read_request_truncated_address() {
        let mut mock = Builder::new().read(&[5, 1, 0, 1]).read(&[127, 0]).build();
        let mut machine = Handshake::for_request();
        let result = read_request(&mut mock, &mut machine).await;
        assert!(matches!(
            result,
            Err(RelayError::ShortRead {
                stage: "IPv4 address"
            })
        ));
    }
}

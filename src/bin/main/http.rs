use alloc::string::String;
use core::cell::RefCell;
use core::fmt::Write as _;

use embassy_net::{
    Stack,
    tcp::{Error as TcpError, TcpSocket},
};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write as AsyncWrite;
use heapless::String as HeaplessString;
use log::{info, warn};
use smartclock_core::{
    connectivity::{CredentialStore, WifiRadio},
    control::{AfterReply, ContentType},
    device::Device,
    display::StatusDisplay,
    files::FileStore,
    storage::Eeprom,
};

use crate::{logger, now_ms, restart};

const HTTP_PORT: u16 = 80;
const SOCKET_BUFFER_BYTES: usize = 1536;
const REQUEST_BYTES: usize = 1024;
const BODY_BYTES: usize = 2048;
const SOCKET_TIMEOUT_SECS: u64 = 10;
const ACCEPT_RETRY_MS: u64 = 200;

/// One connection at a time on port 80 of `stack`. Runs forever; restarts the
/// chip when a request asks for it.
pub async fn serve<E, R, C, D, F>(
    stack: Stack<'_>,
    device: &RefCell<Device<E, R, C, D, F>>,
    name: &'static str,
) -> !
where
    E: Eeprom,
    R: WifiRadio,
    C: CredentialStore,
    D: StatusDisplay,
    F: FileStore,
{
    let mut rx_buffer = [0u8; SOCKET_BUFFER_BYTES];
    let mut tx_buffer = [0u8; SOCKET_BUFFER_BYTES];
    let mut body: HeaplessString<BODY_BYTES> = HeaplessString::new();

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));

        if let Err(err) = socket.accept(HTTP_PORT).await {
            warn!("http: {} accept failed: {:?}", name, err);
            Timer::after_millis(ACCEPT_RETRY_MS).await;
            continue;
        }

        let after = match serve_one(&mut socket, device, &mut body).await {
            Ok(after) => after,
            Err(err) => {
                warn!("http: {} connection dropped: {:?}", name, err);
                AfterReply::Nothing
            }
        };
        close(&mut socket).await;

        if after == AfterReply::FactoryReset {
            let report = device.borrow_mut().trigger_factory_reset();
            info!(
                "reset: factory reset requested over http complete={}",
                report.is_complete()
            );
            restart();
        }
    }
}

async fn serve_one<E, R, C, D, F, const N: usize>(
    socket: &mut TcpSocket<'_>,
    device: &RefCell<Device<E, R, C, D, F>>,
    body: &mut HeaplessString<N>,
) -> Result<AfterReply, TcpError>
where
    E: Eeprom,
    R: WifiRadio,
    C: CredentialStore,
    D: StatusDisplay,
    F: FileStore,
{
    let mut request = [0u8; REQUEST_BYTES];
    let mut len = 0usize;
    loop {
        let read = socket.read(&mut request[len..]).await?;
        if read == 0 {
            if len == 0 {
                return Ok(AfterReply::Nothing);
            }
            break;
        }
        len += read;
        if len == request.len() || header_end(&request[..len]).is_some() {
            break;
        }
    }

    // Bodies beyond the request buffer are cut short.
    let head_len = header_end(&request[..len]).unwrap_or(len);
    let body_end = head_len
        .saturating_add(content_length(&request[..head_len]))
        .min(request.len());
    while len < body_end {
        let read = socket.read(&mut request[len..body_end]).await?;
        if read == 0 {
            break;
        }
        len += read;
    }

    let (head, payload) = request[..len.min(body_end)].split_at(head_len);
    let Some((method, target)) = request_line(head) else {
        write_response(socket, 400, ContentType::Text, b"Bad request").await?;
        return Ok(AfterReply::Nothing);
    };

    let reply = device
        .borrow_mut()
        .handle_target(method, target, payload, now_ms(), body);
    info!("http: {} {} -> {}", method, target, reply.status);

    if reply.after == AfterReply::SendLog {
        let mut log = String::new();
        if logger::write_recent(&mut log).is_err() {
            warn!("http: log snapshot truncated");
        }
        write_response(socket, reply.status, reply.content_type, log.as_bytes()).await?;
    } else {
        write_response(socket, reply.status, reply.content_type, body.as_bytes()).await?;
    }
    Ok(reply.after)
}

/// Offset just past the blank line ending the headers.
fn header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|at| at + 4)
}

/// `Content-Length` from the header block, zero when absent or malformed.
fn content_length(head: &[u8]) -> usize {
    let Ok(text) = core::str::from_utf8(head) else {
        return 0;
    };
    text.lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// `METHOD target` from the first request line.
fn request_line(raw: &[u8]) -> Option<(&str, &str)> {
    let end = raw
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(raw.len());
    let line = core::str::from_utf8(&raw[..end]).ok()?;
    let mut parts = line.split_ascii_whitespace();
    Some((parts.next()?, parts.next()?))
}

async fn write_response(
    socket: &mut TcpSocket<'_>,
    status: u16,
    content_type: ContentType,
    body: &[u8],
) -> Result<(), TcpError> {
    let mut head: HeaplessString<160> = HeaplessString::new();
    let _ = write!(
        head,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason_phrase(status),
        content_type.as_str(),
        body.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(body).await?;
    socket.flush().await
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

async fn close(socket: &mut TcpSocket<'_>) {
    socket.close();
    Timer::after_millis(50).await;
    socket.abort();
}

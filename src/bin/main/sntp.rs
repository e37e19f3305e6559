use core::cell::RefCell;

use embassy_net::{
    Stack,
    dns::{DnsQueryType, Error as DnsError},
    udp::{BindError, PacketMetadata, RecvError, SendError, UdpSocket},
};
use embassy_time::{Duration, Timer, with_timeout};
use log::{info, warn};
use smartclock_core::{
    clock::{
        NTP_PORT, NTP_SERVER, SNTP_PACKET_LEN, SntpError, next_sync_delay_secs, parse_sntp_reply,
        sntp_request,
    },
    connectivity::{CredentialStore, WifiRadio},
    device::Device,
    display::StatusDisplay,
    files::FileStore,
    storage::Eeprom,
};

use crate::now_ms;

const REPLY_TIMEOUT_SECS: u64 = 5;
const UDP_BUFFER_BYTES: usize = 128;

#[derive(Debug)]
enum SyncError {
    Dns(DnsError),
    NoAddress,
    Bind(BindError),
    Send(SendError),
    Timeout,
    Recv(RecvError),
    Reply(SntpError),
}

/// Keeps the device clock in step with `pool.ntp.org` over the station
/// interface. Waits for an address before every attempt.
pub async fn run<E, R, C, D, F>(stack: Stack<'_>, device: &RefCell<Device<E, R, C, D, F>>) -> !
where
    E: Eeprom,
    R: WifiRadio,
    C: CredentialStore,
    D: StatusDisplay,
    F: FileStore,
{
    let mut failures = 0u32;
    loop {
        stack.wait_config_up().await;

        match fetch_unix_time(stack).await {
            Ok(unix_secs) => {
                failures = 0;
                device.borrow_mut().set_time(unix_secs, now_ms());
                info!("sntp: synced unix={}", unix_secs);
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                warn!("sntp: sync failed ({} in a row): {:?}", failures, err);
            }
        }

        let synced = device.borrow().clock().is_set();
        Timer::after_secs(next_sync_delay_secs(failures, synced)).await;
    }
}

async fn fetch_unix_time(stack: Stack<'_>) -> Result<u64, SyncError> {
    let addresses = stack
        .dns_query(NTP_SERVER, DnsQueryType::A)
        .await
        .map_err(SyncError::Dns)?;
    let server = *addresses.first().ok_or(SyncError::NoAddress)?;

    let mut rx_meta = [PacketMetadata::EMPTY; 1];
    let mut rx_buffer = [0u8; UDP_BUFFER_BYTES];
    let mut tx_meta = [PacketMetadata::EMPTY; 1];
    let mut tx_buffer = [0u8; UDP_BUFFER_BYTES];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    socket.bind(0).map_err(SyncError::Bind)?;

    socket
        .send_to(&sntp_request(), (server, NTP_PORT))
        .await
        .map_err(SyncError::Send)?;

    let mut reply = [0u8; SNTP_PACKET_LEN];
    let (len, _) = with_timeout(
        Duration::from_secs(REPLY_TIMEOUT_SECS),
        socket.recv_from(&mut reply),
    )
    .await
    .map_err(|_| SyncError::Timeout)?
    .map_err(SyncError::Recv)?;

    parse_sntp_reply(&reply[..len]).map_err(SyncError::Reply)
}

//! Free local port selection.
//!
//! Candidates are drawn at random from a range below the Linux ephemeral
//! range (32768-60999) and the Windows one (49152-65535), so a chosen port
//! does not collide with ports the OS hands out for outbound connections.

use std::collections::HashSet;
use std::fs;
use std::net::{Ipv4Addr, TcpListener};
use std::ops::Range;

use rand::Rng;

/// Range candidate ports are sampled from.
pub const CANDIDATE_PORTS: Range<u16> = Range {
    start: 20000,
    end: 32000,
};

/// Number of candidates tried before giving up.
pub const MAX_ATTEMPTS: usize = 1000;

/// Kernel tables listing local TCP sockets.
const PROC_TCP_TABLES: [&str; 2] = ["/proc/net/tcp", "/proc/net/tcp6"];

#[derive(Debug, thiserror::Error)]
pub enum PortFinderError {
    #[error("No free local port found in {start}-{end} after {attempts} attempts")]
    Exhausted { start: u16, end: u16, attempts: usize },
}

/// Find a local TCP port that no listener or connection currently uses.
///
/// # Returns
/// * `Ok(u16)` - A port that was free when checked
/// * `Err(PortFinderError::Exhausted)` - Every attempt hit a used port
pub fn find_free_local_port() -> Result<u16, PortFinderError> {
    let occupied = occupied_local_ports();
    log::debug!("Found {} local TCP ports in use", occupied.len());

    find_free_port_in(
        CANDIDATE_PORTS,
        MAX_ATTEMPTS,
        &occupied,
        &mut rand::thread_rng(),
        |port| TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok(),
    )
}

/// Sample `attempts` candidates from `range`, skipping ports in `occupied`
/// and ports for which `is_bindable` fails.
pub fn find_free_port_in<R, F>(
    range: Range<u16>,
    attempts: usize,
    occupied: &HashSet<u16>,
    rng: &mut R,
    mut is_bindable: F,
) -> Result<u16, PortFinderError>
where
    R: Rng,
    F: FnMut(u16) -> bool,
{
    for _ in 0..attempts {
        let port = rng.gen_range(range.clone());
        if !occupied.contains(&port) && is_bindable(port) {
            return Ok(port);
        }
    }

    Err(PortFinderError::Exhausted {
        start: range.start,
        end: range.end,
        attempts,
    })
}

/// Local ports of all TCP listeners and connections known to the kernel.
/// Returns an empty set where the tables are unavailable.
pub fn occupied_local_ports() -> HashSet<u16> {
    let mut ports = HashSet::new();
    for table in PROC_TCP_TABLES {
        if let Ok(content) = fs::read_to_string(table) {
            ports.extend(parse_proc_tcp_table(&content));
        }
    }
    ports
}

/// Parse the local port column of a `/proc/net/tcp`-style table.
///
/// Each row looks like `0: 0100007F:1F90 00000000:0000 0A ...`, where the
/// port is the hex number after the colon of the second column.
fn parse_proc_tcp_table(content: &str) -> Vec<u16> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let local = line.split_whitespace().nth(1)?;
            let (_, port) = local.rsplit_once(':')?;
            u16::from_str_radix(port, 16).ok()
        })
        .collect()
}

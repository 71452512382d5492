// STROBOSCOPE: Scheduling and Correlation of Fine-Grained Traffic Mirroring Queries
// Copyright (C) 2024-2025 The Stroboscope Developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Loading mirrored traffic captures into per-router slices.
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::net::Ipv4Addr;
use std::path::Path;

use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use flate2::bufread::GzDecoder;
use lazy_static::lazy_static;
use pcap_file::pcap::{PcapPacket, PcapReader};
use regex::Regex;

use crate::topology::NetGraph;
use crate::NodeId;

lazy_static! {
    static ref CAPTURE_FILENAME: Regex =
        Regex::new(r"^(?P<router>.+)_(?P<epoch>\d+)\.pcap(?P<gz>\.gz)?$").unwrap();
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Pcap error: {0}")]
    Pcap(#[from] pcap_file::PcapError),
}

/// Identity of a mirrored packet, stable across all mirroring routers.
///
/// UDP packets carry their sequence number in the first eight payload
/// bytes, TCP packets use their sequence number, and everything else
/// falls back to the IPv4 identification field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u64,
}

impl std::fmt::Display for PacketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}: seq {}",
            self.src, self.src_port, self.dst, self.dst_port, self.seq
        )
    }
}

/// A single mirrored packet as seen by one router.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketRecord {
    pub key: PacketKey,
    /// Capture timestamp, in seconds.
    pub time: f64,
    /// Remaining IPv4 time-to-live at the mirroring router.
    pub ttl: u8,
}

/// All packets mirrored at one router, in capture order.
///
/// Lookups by [`PacketKey`] return the first copy of a packet, so
/// duplicated mirror rules do not inflate the correlation counts.
#[derive(Debug, Clone, Default)]
pub struct TrafficSlice {
    packets: Vec<PacketRecord>,
    by_key: HashMap<PacketKey, usize>,
}

impl TrafficSlice {
    pub fn push(&mut self, record: PacketRecord) {
        let idx = self.packets.len();
        self.by_key.entry(record.key).or_insert(idx);
        self.packets.push(record);
    }

    /// The first capture of the packet with the given identity.
    pub fn get(&self, key: &PacketKey) -> Option<&PacketRecord> {
        self.by_key.get(key).map(|i| &self.packets[*i])
    }

    pub fn contains(&self, key: &PacketKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn packets(&self) -> impl Iterator<Item = &PacketRecord> + '_ {
        self.packets.iter()
    }
}

/// The traffic slices of one measurement, keyed by the mirroring router.
pub type CaptureSet = HashMap<NodeId, TrafficSlice>;

/// Load all capture files in `dir` into per-router traffic slices.
///
/// Capture files are named `<router>_<epoch>.pcap`, with an optional `.gz`
/// suffix; router names may themselves contain underscores. Files that do
/// not match the pattern are skipped, and files of routers unknown to `g`
/// are skipped with a warning. Multiple epochs of the same router merge
/// into a single slice.
pub fn load_capture_dir(g: &NetGraph, dir: impl AsRef<Path>) -> Result<CaptureSet, CaptureError> {
    let mut slices = CaptureSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let filename = entry.file_name();
        let filename = filename.to_string_lossy();
        let Some(caps) = CAPTURE_FILENAME.captures(&filename) else {
            log::trace!("Skipping {filename}: not a capture file");
            continue;
        };
        let router = &caps["router"];
        let Ok(node) = g.router_id(router) else {
            log::warn!("Skipping {}: {} is not a router of {}", filename, router, g.name());
            continue;
        };
        let slice = slices.entry(node).or_default();
        let before = slice.len();
        read_capture(&entry.path(), caps.name("gz").is_some(), slice)?;
        log::debug!("Read {} packets mirrored at {router} from {filename}", slice.len() - before);
    }
    log::info!(
        "Loaded {} packets from {} capture slices",
        slices.values().map(TrafficSlice::len).sum::<usize>(),
        slices.len()
    );
    Ok(slices)
}

/// Append all parseable packets of a single capture file to `slice`.
pub fn read_capture(
    path: &Path,
    gzipped: bool,
    slice: &mut TrafficSlice,
) -> Result<(), CaptureError> {
    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut cap = PcapReader::new(reader)?;
    while let Some(next_packet) = cap.next_packet() {
        match next_packet {
            Ok(packet) => {
                if let Some(record) = parse_packet(&packet) {
                    slice.push(record);
                }
            }
            // truncated captures are common, keep what was read so far
            Err(e) => {
                log::warn!("Stopping early on {path:?}: {e}");
                break;
            }
        }
    }
    Ok(())
}

/// Extract the identity, timestamp and TTL of a mirrored packet.
///
/// Returns `None` for anything that is not IPv4 over Ethernet.
pub fn parse_packet(packet: &PcapPacket<'_>) -> Option<PacketRecord> {
    let Ok(pkt) = SlicedPacket::from_ethernet(&packet.data) else {
        return None;
    };
    let Some(InternetSlice::Ipv4(ip)) = pkt.net else {
        return None;
    };

    let fallback = u64::from(ip.header().identification());
    let (src_port, dst_port, seq) = match &pkt.transport {
        Some(TransportSlice::Udp(udp)) => {
            // the prober writes the sequence number into the payload
            let seq = udp
                .payload()
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .map(u64::from_be_bytes)
                .unwrap_or(fallback);
            (udp.source_port(), udp.destination_port(), seq)
        }
        Some(TransportSlice::Tcp(tcp)) => (
            tcp.source_port(),
            tcp.destination_port(),
            u64::from(tcp.sequence_number()),
        ),
        _ => (0, 0, fallback),
    };

    Some(PacketRecord {
        key: PacketKey {
            src: ip.header().source_addr(),
            dst: ip.header().destination_addr(),
            protocol: ip.header().protocol().0,
            src_port,
            dst_port,
            seq,
        },
        time: packet.timestamp.as_secs_f64(),
        ttl: ip.header().ttl(),
    })
}

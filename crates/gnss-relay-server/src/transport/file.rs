use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use gnss_relay_core::endpoint::FileAddress;
use gnss_relay_core::{RelayOptions, StreamKind, StreamRole};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info};

use super::Transport;
use crate::error::{TransportError, TransportResult};

/// Size of the time-tag file header, followed by the start time.
pub const TAG_HEADER_LEN: usize = 64;
const TAG_MAGIC: &[u8] = b"TIMETAG gnss-relay";
const TAG_RECORD_LEN: usize = 8;

/// Days from the Unix epoch to the GPS epoch (1980-01-06).
const GPS_EPOCH_DAYS: i64 = 3657;

// ============================================================================
// Path keywords
// ============================================================================

/// Replace time keywords in a path template.
///
/// `%Y` year, `%y` two-digit year, `%m` month, `%d` day, `%h` hour,
/// `%H` hour code (`a`..`x`), `%M` minute, `%S` second, `%n` day of year,
/// `%W` GPS week, `%D` day of GPS week. Unknown keywords are kept.
pub fn expand_path(template: &str, time: DateTime<Utc>) -> String {
    let days = time.timestamp().div_euclid(86_400) - GPS_EPOCH_DAYS;
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str(&format!("{:04}", time.year())),
            Some('y') => out.push_str(&format!("{:02}", time.year().rem_euclid(100))),
            Some('m') => out.push_str(&format!("{:02}", time.month())),
            Some('d') => out.push_str(&format!("{:02}", time.day())),
            Some('h') => out.push_str(&format!("{:02}", time.hour())),
            Some('H') => out.push(char::from(b'a' + time.hour() as u8)),
            Some('M') => out.push_str(&format!("{:02}", time.minute())),
            Some('S') => out.push_str(&format!("{:02}", time.second())),
            Some('n') => out.push_str(&format!("{:03}", time.ordinal())),
            Some('W') => out.push_str(&format!("{:04}", days.div_euclid(7))),
            Some('D') => out.push_str(&days.rem_euclid(7).to_string()),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn tag_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tag");
    PathBuf::from(name)
}

fn unix_ms(time: DateTime<Utc>) -> u64 {
    time.timestamp_millis().max(0) as u64
}

// ============================================================================
// Time tags
// ============================================================================

/// One time-tag record: by `ms` after the start, `offset` bytes were written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TagRecord {
    ms: u32,
    offset: u32,
}

fn parse_tags(bytes: &[u8]) -> io::Result<Vec<TagRecord>> {
    if bytes.len() < TAG_HEADER_LEN + 8 || !bytes.starts_with(b"TIMETAG") {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a time-tag file"));
    }
    let records = bytes[TAG_HEADER_LEN + 8..]
        .chunks_exact(TAG_RECORD_LEN)
        .map(|r| TagRecord {
            ms: u32::from_le_bytes([r[0], r[1], r[2], r[3]]),
            offset: u32::from_le_bytes([r[4], r[5], r[6], r[7]]),
        })
        .collect();
    Ok(records)
}

/// Bytes released for playback once `elapsed_ms` of log time has passed.
fn released(records: &[TagRecord], elapsed_ms: u64) -> u64 {
    let idx = records.partition_point(|r| u64::from(r.ms) <= elapsed_ms);
    match idx {
        0 => 0,
        _ => u64::from(records[idx - 1].offset),
    }
}

/// Bytes logged strictly before `start_ms`; playback skips them.
fn skipped(records: &[TagRecord], start_ms: u64) -> u64 {
    let idx = records.partition_point(|r| u64::from(r.ms) < start_ms);
    match idx {
        0 => 0,
        _ => u64::from(records[idx - 1].offset),
    }
}

#[derive(Debug)]
struct Playback {
    records: Vec<TagRecord>,
    start_ms: u64,
    speed: f64,
    opened: Instant,
    position: u64,
}

impl Playback {
    fn available(&self) -> u64 {
        let elapsed = self.opened.elapsed().as_secs_f64() * 1000.0 * self.speed;
        released(&self.records, self.start_ms + elapsed as u64).saturating_sub(self.position)
    }
}

#[derive(Debug)]
struct Reader {
    file: File,
    playback: Option<Playback>,
}

#[derive(Debug)]
struct Writer {
    path: PathBuf,
    file: File,
    tag: Option<File>,
    started: DateTime<Utc>,
    written: u64,
}

impl Writer {
    async fn create(path: PathBuf, time_tag: bool, now: DateTime<Utc>) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;

        let tag = if time_tag {
            let mut tag = File::create(tag_path(&path)).await?;
            let mut header = [b' '; TAG_HEADER_LEN];
            header[..TAG_MAGIC.len()].copy_from_slice(TAG_MAGIC);
            tag.write_all(&header).await?;
            tag.write_all(&unix_ms(now).to_le_bytes()).await?;
            Some(tag)
        } else {
            None
        };

        info!("Logging to {}", path.display());
        Ok(Self {
            path,
            file,
            tag,
            started: now,
            written: 0,
        })
    }

    async fn write(&mut self, data: &[u8], now: DateTime<Utc>) -> io::Result<()> {
        self.file.write_all(data).await?;
        self.file.flush().await?;
        self.written += data.len() as u64;

        if let Some(tag) = self.tag.as_mut() {
            let ms = (now - self.started).num_milliseconds().clamp(0, u32::MAX as i64) as u32;
            let mut record = [0u8; TAG_RECORD_LEN];
            record[..4].copy_from_slice(&ms.to_le_bytes());
            record[4..].copy_from_slice(&(self.written.min(u32::MAX as u64) as u32).to_le_bytes());
            tag.write_all(&record).await?;
            tag.flush().await?;
        }
        Ok(())
    }

    async fn close(mut self) {
        let _ = self.file.flush().await;
        if let Some(mut tag) = self.tag.take() {
            let _ = tag.flush().await;
        }
        debug!("Closed {}", self.path.display());
    }
}

#[derive(Debug)]
enum Handle {
    Reader(Reader),
    Writer {
        current: Writer,
        /// Previous file, still written until the overlap ends.
        previous: Option<(Writer, DateTime<Utc>)>,
        next_swap: Option<DateTime<Utc>>,
    },
}

// ============================================================================
// Transport
// ============================================================================

/// Log file source or sink.
///
/// As an input the file is read as fast as the relay loop polls it, or
/// paced by its time-tag sidecar. As an output the path may contain time
/// keywords and is swapped to a new file every `swap_hours`; the new file
/// is opened `swap_margin` before the boundary and both files receive data
/// until `swap_margin` after it.
#[derive(Debug)]
pub struct FileTransport {
    address: FileAddress,
    role: StreamRole,
    local_dir: Option<PathBuf>,
    swap_margin: Duration,
    handle: Option<Handle>,
}

impl FileTransport {
    pub fn new(address: FileAddress, role: StreamRole, options: &RelayOptions) -> Self {
        Self {
            address,
            role,
            local_dir: options.local_dir.clone(),
            swap_margin: options.swap_margin,
            handle: None,
        }
    }

    /// Concrete path for the given time.
    pub fn path_at(&self, time: DateTime<Utc>) -> PathBuf {
        let expanded = PathBuf::from(expand_path(&self.address.path, time));
        match &self.local_dir {
            Some(dir) if expanded.is_relative() => dir.join(expanded),
            _ => expanded,
        }
    }

    /// Path of the file currently being written or read.
    pub fn current_path(&self) -> Option<&Path> {
        match self.handle.as_ref()? {
            Handle::Writer { current, .. } => Some(&current.path),
            Handle::Reader(_) => None,
        }
    }

    fn swap_period(&self) -> Option<i64> {
        let secs = (self.address.swap_hours * 3600.0).round() as i64;
        (secs > 0).then_some(secs)
    }

    fn boundary_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let period = self.swap_period()?;
        let next = (now.timestamp().div_euclid(period) + 1) * period;
        Utc.timestamp_opt(next, 0).single()
    }

    fn margin(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.swap_margin).unwrap_or_else(|_| chrono::Duration::zero())
    }

    async fn open_reader(&self, now: DateTime<Utc>) -> TransportResult<Reader> {
        let path = self.path_at(now);
        let mut file = File::open(&path).await?;

        let playback = if self.address.time_tag {
            let records = parse_tags(&fs::read(tag_path(&path)).await?)?;
            let start_ms = (self.address.start * 1000.0) as u64;
            let position = skipped(&records, start_ms);
            file.seek(SeekFrom::Start(position)).await?;
            Some(Playback {
                records,
                start_ms,
                speed: self.address.speed,
                opened: Instant::now(),
                position,
            })
        } else {
            None
        };

        info!("Reading {}", path.display());
        Ok(Reader { file, playback })
    }

    pub(crate) async fn open_at(&mut self, now: DateTime<Utc>) -> TransportResult<()> {
        let handle = match self.role {
            StreamRole::Input => Handle::Reader(self.open_reader(now).await?),
            StreamRole::Output => Handle::Writer {
                current: Writer::create(self.path_at(now), self.address.time_tag, now).await?,
                previous: None,
                next_swap: self.boundary_after(now),
            },
        };
        self.handle = Some(handle);
        Ok(())
    }

    pub(crate) async fn write_at(&mut self, data: &[u8], now: DateTime<Utc>) -> TransportResult<usize> {
        match &self.handle {
            None => return Err(TransportError::NotOpen),
            Some(Handle::Reader(_)) => return Ok(0),
            Some(Handle::Writer { .. }) => {}
        }
        let margin = self.margin();
        let period = self.swap_period();
        let swap_path = match &self.handle {
            Some(Handle::Writer {
                next_swap: Some(boundary),
                ..
            }) if now + margin >= *boundary => Some((*boundary, self.path_at(*boundary))),
            _ => None,
        };
        let time_tag = self.address.time_tag;

        let Some(Handle::Writer {
            current,
            previous,
            next_swap,
        }) = self.handle.as_mut()
        else {
            return Err(TransportError::NotOpen);
        };

        if let Some((boundary, path)) = swap_path {
            *next_swap = period.and_then(|p| Utc.timestamp_opt(boundary.timestamp() + p, 0).single());
            if path != current.path {
                let next = Writer::create(path, time_tag, now).await?;
                let old = std::mem::replace(current, next);
                if let Some((stale, _)) = previous.replace((old, boundary + margin)) {
                    stale.close().await;
                }
            }
        }

        if previous.as_ref().is_some_and(|(_, close_at)| now >= *close_at) {
            if let Some((old, _)) = previous.take() {
                old.close().await;
            }
        }

        current.write(data, now).await?;
        if let Some((old, _)) = previous.as_mut() {
            old.write(data, now).await?;
        }
        Ok(data.len())
    }
}

#[async_trait]
impl Transport for FileTransport {
    fn kind(&self) -> StreamKind {
        StreamKind::File
    }

    fn describe(&self) -> String {
        format!("file://{}", self.address.path)
    }

    async fn open(&mut self) -> TransportResult<()> {
        self.open_at(Utc::now()).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        let reader = match self.handle.as_mut() {
            Some(Handle::Reader(reader)) => reader,
            Some(Handle::Writer { .. }) => return Ok(0),
            None => return Err(TransportError::NotOpen),
        };

        let limit = match &reader.playback {
            Some(playback) => buf.len().min(playback.available().min(usize::MAX as u64) as usize),
            None => buf.len(),
        };
        if limit == 0 {
            return Ok(0);
        }
        let n = reader.file.read(&mut buf[..limit]).await?;
        if let Some(playback) = reader.playback.as_mut() {
            playback.position += n as u64;
        }
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        self.write_at(data, Utc::now()).await
    }

    async fn close(&mut self) {
        match self.handle.take() {
            Some(Handle::Writer {
                current, previous, ..
            }) => {
                if let Some((old, _)) = previous {
                    old.close().await;
                }
                current.close().await;
            }
            Some(Handle::Reader(_)) | None => {}
        }
    }
}

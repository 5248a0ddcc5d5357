//! Progressive MP4 writer for a single H.264 track.
//!
//! Samples are buffered in memory and the file is laid out at finalize as
//! `ftyp`, `mdat`, then a trailing `moov` whose sample tables point into the
//! single `mdat` chunk.

use maplapse_common::{MaplapseError, MaplapseResult};
use maplapse_history_model::{Container, EncodedPacket};

use crate::avc;
use crate::ContainerMuxer;

/// Media timescale: one tick per microsecond, matching packet timestamps.
const MEDIA_TIMESCALE: u32 = 1_000_000;
/// Movie header timescale (milliseconds).
const MOVIE_TIMESCALE: u32 = 1_000;
const TRACK_ID: u32 = 1;
const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

#[derive(Debug, Clone)]
struct Mp4Sample {
    timestamp_us: u64,
    duration_us: u64,
    size: u32,
    keyframe: bool,
}

/// In-memory MP4 writer.
#[derive(Debug)]
pub struct Mp4Muxer {
    width: u32,
    height: u32,
    avcc: Option<Vec<u8>>,
    mdat: Vec<u8>,
    samples: Vec<Mp4Sample>,
    finalized: bool,
    buffer: Vec<u8>,
}

impl Mp4Muxer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            avcc: None,
            mdat: Vec::new(),
            samples: Vec::new(),
            finalized: false,
            buffer: Vec::new(),
        }
    }

    /// Per-sample durations in media ticks. Each sample lasts until the next
    /// one starts; the last keeps its own duration.
    fn sample_durations(&self) -> MaplapseResult<Vec<u32>> {
        let mut durations = Vec::with_capacity(self.samples.len());
        for (i, sample) in self.samples.iter().enumerate() {
            let duration = match self.samples.get(i + 1) {
                Some(next) => next.timestamp_us - sample.timestamp_us,
                None => sample.duration_us,
            };
            let duration = u32::try_from(duration)
                .map_err(|_| MaplapseError::mux("sample duration exceeds mp4 range"))?;
            durations.push(duration);
        }
        Ok(durations)
    }

    fn write_file(&self, avcc: &[u8]) -> MaplapseResult<Vec<u8>> {
        let durations = self.sample_durations()?;
        let media_duration: u64 = durations.iter().map(|&d| d as u64).sum();
        let movie_duration = media_duration / (MEDIA_TIMESCALE / MOVIE_TIMESCALE) as u64;
        let header = HeaderVersion::for_duration(media_duration);

        let mdat_size = u32::try_from(8 + self.mdat.len())
            .map_err(|_| MaplapseError::mux("media data exceeds 4 GiB"))?;

        let mut out = Vec::with_capacity(self.mdat.len() + 1024 + self.samples.len() * 12);
        write_ftyp(&mut out);
        let chunk_offset = (out.len() + 8) as u32;
        out.extend_from_slice(&mdat_size.to_be_bytes());
        out.extend_from_slice(b"mdat");
        out.extend_from_slice(&self.mdat);

        let tables = SampleTables {
            durations: &durations,
            samples: &self.samples,
            chunk_offset,
        };
        write_box(&mut out, b"moov", |b| {
            write_mvhd(b, header, movie_duration);
            write_box(b, b"trak", |b| {
                write_tkhd(b, header, movie_duration, self.width, self.height);
                write_box(b, b"mdia", |b| {
                    write_mdhd(b, header, media_duration);
                    write_hdlr(b);
                    write_box(b, b"minf", |b| {
                        write_vmhd(b);
                        write_dinf(b);
                        write_box(b, b"stbl", |b| {
                            write_stsd(b, self.width, self.height, avcc);
                            tables.write(b);
                        });
                    });
                });
            });
        });
        Ok(out)
    }
}

impl ContainerMuxer for Mp4Muxer {
    fn container(&self) -> Container {
        Container::Mp4
    }

    fn add_packet(
        &mut self,
        packet: EncodedPacket,
        decoder_config: Option<&[u8]>,
    ) -> MaplapseResult<()> {
        if self.finalized {
            return Err(MaplapseError::mux("packet added after finalize"));
        }
        if let Some(last) = self.samples.last() {
            if packet.timestamp_us <= last.timestamp_us {
                return Err(MaplapseError::mux(format!(
                    "non-increasing timestamp {} after {}",
                    packet.timestamp_us, last.timestamp_us
                )));
            }
        }

        if self.avcc.is_none() {
            if let Some(config) = decoder_config {
                self.avcc = Some(config.to_vec());
            } else if let Some((sps, pps)) = avc::find_parameter_sets(&packet.data) {
                tracing::debug!("Derived avcC from in-band parameter sets");
                self.avcc = Some(avc::build_avcc_record(sps, pps));
            }
        }

        let data = avc::annex_b_to_length_prefixed(&packet.data);
        let size = u32::try_from(data.len())
            .map_err(|_| MaplapseError::mux("sample exceeds 4 GiB"))?;
        self.mdat.extend_from_slice(&data);
        self.samples.push(Mp4Sample {
            timestamp_us: packet.timestamp_us,
            duration_us: packet.duration_us,
            size,
            keyframe: packet.is_keyframe,
        });
        Ok(())
    }

    fn finalize(&mut self) -> MaplapseResult<()> {
        if self.finalized {
            return Err(MaplapseError::mux("mp4 writer already finalized"));
        }
        self.finalized = true;
        if self.samples.is_empty() {
            tracing::warn!("Finalizing mp4 with no samples");
            return Ok(());
        }
        let avcc = self
            .avcc
            .as_deref()
            .ok_or_else(|| MaplapseError::mux("no H.264 decoder configuration was provided"))?;
        self.buffer = self.write_file(avcc)?;
        self.mdat = Vec::new();
        tracing::debug!(
            samples = self.samples.len(),
            bytes = self.buffer.len(),
            "mp4 finalized"
        );
        Ok(())
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn packet_count(&self) -> usize {
        self.samples.len()
    }
}

/// Write a box, back-patching its size once `body` has run.
fn write_box(buf: &mut Vec<u8>, kind: &[u8; 4], body: impl FnOnce(&mut Vec<u8>)) {
    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(kind);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_full_box(
    buf: &mut Vec<u8>,
    kind: &[u8; 4],
    flags: u32,
    body: impl FnOnce(&mut Vec<u8>),
) {
    write_versioned_box(buf, kind, 0, flags, body);
}

fn write_versioned_box(
    buf: &mut Vec<u8>,
    kind: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut Vec<u8>),
) {
    write_box(buf, kind, |b| {
        let word = (u32::from(version) << 24) | (flags & 0x00FF_FFFF);
        b.extend_from_slice(&word.to_be_bytes());
        body(b);
    });
}

/// mvhd/tkhd/mdhd layout. Version 1 widens times and durations to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderVersion {
    V0,
    V1,
}

impl HeaderVersion {
    fn for_duration(media_duration: u64) -> Self {
        if media_duration > u64::from(u32::MAX) {
            Self::V1
        } else {
            Self::V0
        }
    }

    fn number(self) -> u8 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
        }
    }

    /// Creation and modification times (always zero).
    fn put_times(self, buf: &mut Vec<u8>) {
        match self {
            Self::V0 => buf.extend_from_slice(&[0; 8]),
            Self::V1 => buf.extend_from_slice(&[0; 16]),
        }
    }

    /// Callers pick `V1` whenever the media duration exceeds `u32`, and the
    /// movie duration is always smaller, so the V0 narrowing cannot truncate.
    fn put_duration(self, buf: &mut Vec<u8>, duration: u64) {
        match self {
            Self::V0 => put_u32(buf, duration as u32),
            Self::V1 => buf.extend_from_slice(&duration.to_be_bytes()),
        }
    }
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_ftyp(buf: &mut Vec<u8>) {
    write_box(buf, b"ftyp", |b| {
        b.extend_from_slice(b"isom");
        put_u32(b, 0x200);
        for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
            b.extend_from_slice(brand);
        }
    });
}

fn write_mvhd(buf: &mut Vec<u8>, version: HeaderVersion, duration: u64) {
    write_versioned_box(buf, b"mvhd", version.number(), 0, |b| {
        version.put_times(b);
        put_u32(b, MOVIE_TIMESCALE);
        version.put_duration(b, duration);
        put_u32(b, 0x0001_0000); // rate 1.0
        put_u16(b, 0x0100); // volume 1.0
        b.extend_from_slice(&[0; 10]);
        for m in UNITY_MATRIX {
            put_u32(b, m);
        }
        b.extend_from_slice(&[0; 24]);
        put_u32(b, TRACK_ID + 1);
    });
}

fn write_tkhd(buf: &mut Vec<u8>, version: HeaderVersion, duration: u64, width: u32, height: u32) {
    // enabled | in movie | in preview
    write_versioned_box(buf, b"tkhd", version.number(), 0x7, |b| {
        version.put_times(b);
        put_u32(b, TRACK_ID);
        put_u32(b, 0);
        version.put_duration(b, duration);
        b.extend_from_slice(&[0; 8]);
        put_u16(b, 0); // layer
        put_u16(b, 0); // alternate group
        put_u16(b, 0); // volume
        put_u16(b, 0);
        for m in UNITY_MATRIX {
            put_u32(b, m);
        }
        put_u32(b, width << 16);
        put_u32(b, height << 16);
    });
}

fn write_mdhd(buf: &mut Vec<u8>, version: HeaderVersion, duration: u64) {
    write_versioned_box(buf, b"mdhd", version.number(), 0, |b| {
        version.put_times(b);
        put_u32(b, MEDIA_TIMESCALE);
        version.put_duration(b, duration);
        put_u16(b, 0x55C4); // "und"
        put_u16(b, 0);
    });
}

fn write_hdlr(buf: &mut Vec<u8>) {
    write_full_box(buf, b"hdlr", 0, |b| {
        put_u32(b, 0);
        b.extend_from_slice(b"vide");
        b.extend_from_slice(&[0; 12]);
        b.extend_from_slice(b"VideoHandler\0");
    });
}

fn write_vmhd(buf: &mut Vec<u8>) {
    write_full_box(buf, b"vmhd", 1, |b| {
        put_u16(b, 0); // graphics mode
        b.extend_from_slice(&[0; 6]); // opcolor
    });
}

fn write_dinf(buf: &mut Vec<u8>) {
    write_box(buf, b"dinf", |b| {
        write_full_box(b, b"dref", 0, |b| {
            put_u32(b, 1);
            // self-contained
            write_full_box(b, b"url ", 1, |_| {});
        });
    });
}

fn write_stsd(buf: &mut Vec<u8>, width: u32, height: u32, avcc: &[u8]) {
    write_full_box(buf, b"stsd", 0, |b| {
        put_u32(b, 1);
        write_box(b, b"avc1", |b| {
            b.extend_from_slice(&[0; 6]);
            put_u16(b, 1); // data reference index
            b.extend_from_slice(&[0; 16]);
            put_u16(b, width as u16);
            put_u16(b, height as u16);
            put_u32(b, 0x0048_0000); // 72 dpi
            put_u32(b, 0x0048_0000);
            put_u32(b, 0);
            put_u16(b, 1); // frame count
            let mut compressor = [0u8; 32];
            let name = b"maplapse";
            compressor[0] = name.len() as u8;
            compressor[1..=name.len()].copy_from_slice(name);
            b.extend_from_slice(&compressor);
            put_u16(b, 0x0018);
            b.extend_from_slice(&(-1i16).to_be_bytes());
            write_box(b, b"avcC", |b| b.extend_from_slice(avcc));
        });
    });
}

struct SampleTables<'a> {
    durations: &'a [u32],
    samples: &'a [Mp4Sample],
    chunk_offset: u32,
}

impl SampleTables<'_> {
    fn write(&self, buf: &mut Vec<u8>) {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for &d in self.durations {
            match runs.last_mut() {
                Some((count, delta)) if *delta == d => *count += 1,
                _ => runs.push((1, d)),
            }
        }
        write_full_box(buf, b"stts", 0, |b| {
            put_u32(b, runs.len() as u32);
            for (count, delta) in &runs {
                put_u32(b, *count);
                put_u32(b, *delta);
            }
        });

        let sync: Vec<u32> = self
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.keyframe)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        write_full_box(buf, b"stss", 0, |b| {
            put_u32(b, sync.len() as u32);
            for n in &sync {
                put_u32(b, *n);
            }
        });

        // One chunk holding every sample.
        write_full_box(buf, b"stsc", 0, |b| {
            put_u32(b, 1);
            put_u32(b, 1);
            put_u32(b, self.samples.len() as u32);
            put_u32(b, 1);
        });

        write_full_box(buf, b"stsz", 0, |b| {
            put_u32(b, 0);
            put_u32(b, self.samples.len() as u32);
            for sample in self.samples {
                put_u32(b, sample.size);
            }
        });

        write_full_box(buf, b"stco", 0, |b| {
            put_u32(b, 1);
            put_u32(b, self.chunk_offset);
        });
    }
}

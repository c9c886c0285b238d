//! Stream-copy clip extraction with FFmpeg.
//!
//! Packets are remuxed without re-encoding. The cut starts at the keyframe
//! at or before the requested start, so clips may begin slightly early.

use std::path::Path;

use ffmpeg_next as ffmpeg;

use super::extract::{check_request, ClipExtractor, ExtractionFailure, ExtractionFailureKind};

const OUTPUT_FORMAT: &str = "mp4";

#[derive(Clone, Debug, Default)]
pub struct FfmpegClipExtractor;

impl FfmpegClipExtractor {
    pub fn new() -> anyhow::Result<Self> {
        ffmpeg::init().map_err(|e| anyhow::anyhow!("initialize ffmpeg: {}", e))?;
        Ok(Self)
    }
}

impl ClipExtractor for FfmpegClipExtractor {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn extract(
        &self,
        source: &Path,
        start_s: f64,
        end_s: f64,
        out_path: &Path,
    ) -> Result<(), ExtractionFailure> {
        check_request(source, start_s, end_s)?;

        let mut input = ffmpeg::format::input(&source).map_err(|e| {
            ExtractionFailure::new(
                ExtractionFailureKind::SourceUnreadable,
                format!("ffmpeg cannot open {}: {}", source.display(), e),
            )
        })?;

        let duration_s = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
        if input.duration() > 0 && start_s > duration_s {
            return Err(ExtractionFailure::new(
                ExtractionFailureKind::InvalidRange,
                format!("start {:.3}s is past source end {:.3}s", start_s, duration_s),
            ));
        }

        let mut output = ffmpeg::format::output_as(&out_path, OUTPUT_FORMAT)
            .map_err(ExtractionFailure::backend)?;

        let stream_count = input.nb_streams() as usize;
        let mut mapping: Vec<Option<usize>> = vec![None; stream_count];
        let mut time_bases = vec![ffmpeg::Rational(0, 1); stream_count];
        let mut next_out = 0usize;
        for stream in input.streams() {
            let medium = stream.parameters().medium();
            if !matches!(
                medium,
                ffmpeg::media::Type::Video | ffmpeg::media::Type::Audio
            ) {
                continue;
            }
            let mut out_stream = output
                .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
                .map_err(ExtractionFailure::backend)?;
            out_stream.set_parameters(stream.parameters());
            mapping[stream.index()] = Some(next_out);
            time_bases[stream.index()] = stream.time_base();
            next_out += 1;
        }
        if next_out == 0 {
            return Err(ExtractionFailure::new(
                ExtractionFailureKind::SourceUnreadable,
                format!("{} has no audio or video streams", source.display()),
            ));
        }

        let target = (start_s * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        input
            .seek(target, ..target)
            .map_err(ExtractionFailure::backend)?;

        output.write_header().map_err(ExtractionFailure::backend)?;

        let mut offsets: Vec<Option<i64>> = vec![None; stream_count];
        let mut written = 0u64;
        for (stream, mut packet) in input.packets() {
            let index = stream.index();
            let Some(out_index) = mapping[index] else {
                continue;
            };
            let time_base = time_bases[index];
            let Some(ts) = packet.pts().or(packet.dts()) else {
                continue;
            };
            if ts as f64 * f64::from(time_base) > end_s {
                break;
            }
            let offset = *offsets[index].get_or_insert(ts);
            packet.set_pts(packet.pts().map(|p| p - offset));
            packet.set_dts(packet.dts().map(|d| d - offset));

            let out_time_base = output
                .stream(out_index)
                .map(|s| s.time_base())
                .ok_or_else(|| ExtractionFailure::backend("output stream vanished"))?;
            packet.rescale_ts(time_base, out_time_base);
            packet.set_position(-1);
            packet.set_stream(out_index);
            packet
                .write_interleaved(&mut output)
                .map_err(ExtractionFailure::backend)?;
            written += 1;
        }

        if written == 0 {
            return Err(ExtractionFailure::new(
                ExtractionFailureKind::InvalidRange,
                format!("no packets in {:.3}s..{:.3}s", start_s, end_s),
            ));
        }
        output.write_trailer().map_err(ExtractionFailure::backend)?;
        log::debug!(
            "ffmpeg: cut {} packets from {} ({:.3}s..{:.3}s)",
            written,
            source.display(),
            start_s,
            end_s
        );
        Ok(())
    }
}

//! Transcoder command lines
//!
//! Input options come first so every `-i` is opened with minimal probing,
//! then the strategy's encode options, then the HLS muxer.

use std::path::{Path, PathBuf};

use super::config::{Strategy, TranscoderConfig};
use super::session::MANIFEST_FILE;

/// Segment file pattern inside a stream directory
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

/// SDP file for the `index`th leg
pub fn leg_sdp_path(output_dir: &Path, index: usize) -> PathBuf {
    output_dir.join(format!("leg-{}.sdp", index))
}

const INPUT_OPTIONS: &[&str] = &[
    "-protocol_whitelist",
    "file,udp,rtp",
    "-probesize",
    "32",
    "-analyzeduration",
    "0",
    "-fflags",
    "nobuffer",
    "-flags",
    "low_delay",
];

/// Build the argument vector for a strategy and its SDP inputs
pub fn build_args(
    config: &TranscoderConfig,
    strategy: Strategy,
    sdp_paths: &[PathBuf],
    output_dir: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];

    for (index, sdp) in sdp_paths.iter().enumerate() {
        if index > 0 && strategy == Strategy::Combined {
            args.push("-itsoffset".into());
            args.push(format!("{:.3}", config.leg_offset.as_secs_f64()));
        }
        args.extend(INPUT_OPTIONS.iter().map(|s| s.to_string()));
        args.push("-i".into());
        args.push(sdp.display().to_string());
    }

    match strategy {
        Strategy::Copy => {
            args.extend(["-c:v", "copy"].map(String::from));
        }
        Strategy::LowLatency => {
            push_low_latency_encode(&mut args, config);
        }
        Strategy::Combined => {
            let (w, h) = (config.tile_width, config.tile_height);
            let filter = format!(
                "[0:v]scale={w}:{h},setsar=1[left];\
                 [1:v]scale={w}:{h},setsar=1[right];\
                 [left][right]hstack=inputs=2[out]"
            );
            args.push("-filter_complex".into());
            args.push(filter);
            args.push("-map".into());
            args.push("[out]".into());
            push_low_latency_encode(&mut args, config);
        }
    }
    args.push("-an".into());

    args.extend(
        [
            "-f",
            "hls",
            "-hls_time",
            &config.segment_duration.to_string(),
            "-hls_list_size",
            &config.playlist_size.to_string(),
            "-hls_flags",
            "delete_segments",
            "-hls_segment_filename",
            &output_dir.join(SEGMENT_PATTERN).display().to_string(),
            &output_dir.join(MANIFEST_FILE).display().to_string(),
        ]
        .map(String::from),
    );

    args
}

fn push_low_latency_encode(args: &mut Vec<String>, config: &TranscoderConfig) {
    let gop = config.keyframe_interval.to_string();
    args.extend(
        [
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-tune",
            "zerolatency",
            "-crf",
            "18",
            "-g",
            &gop,
            "-keyint_min",
            &gop,
            "-sc_threshold",
            "0",
        ]
        .map(String::from),
    );
}

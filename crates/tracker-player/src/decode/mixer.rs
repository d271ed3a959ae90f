//! Per-voice sample fetching and stereo placement.

use crate::config::Interpolation;

/// PAL Paula clock divided by two: period → playback rate in Hz.
pub(super) const AMIGA_CLOCK: f64 = 3_546_895.0;

/// Loop window of a sample in frames, `None` for one-shot samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct LoopRange {
    pub start: usize,
    pub end: usize,
}

/// Read sample `idx`, wrapping into the loop past its end and yielding
/// silence past the end of one-shot data.
fn fetch(data: &[i8], idx: isize, looped: Option<LoopRange>) -> f32 {
    if idx < 0 {
        return 0.0;
    }
    let mut idx = idx as usize;
    if let Some(lp) = looped {
        if idx >= lp.end && lp.end > lp.start {
            idx = lp.start + (idx - lp.start) % (lp.end - lp.start);
        }
    }
    data.get(idx).map_or(0.0, |&s| f32::from(s) / 128.0)
}

/// Sample value at fractional position `pos`.
pub(super) fn sample_at(
    data: &[i8],
    pos: f64,
    looped: Option<LoopRange>,
    quality: Interpolation,
) -> f32 {
    let base = pos.floor();
    let frac = (pos - base) as f32;
    let i = base as isize;
    match quality {
        Interpolation::None => fetch(data, i, looped),
        Interpolation::Default | Interpolation::Linear => {
            let a = fetch(data, i, looped);
            let b = fetch(data, i + 1, looped);
            a + (b - a) * frac
        }
        Interpolation::Cubic | Interpolation::WindowedSinc => {
            let p0 = fetch(data, i - 1, looped);
            let p1 = fetch(data, i, looped);
            let p2 = fetch(data, i + 1, looped);
            let p3 = fetch(data, i + 2, looped);
            catmull_rom(p0, p1, p2, p3, frac)
        }
    }
}

fn catmull_rom(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    ((a * t + b) * t + c) * t + p1
}

/// Move a playback position forward by `step` frames.
///
/// Returns `None` once a one-shot sample runs off its end.
pub(super) fn advance(pos: f64, step: f64, len: usize, looped: Option<LoopRange>) -> Option<f64> {
    let next = pos + step;
    match looped {
        Some(lp) if lp.end > lp.start && next >= lp.end as f64 => {
            let span = (lp.end - lp.start) as f64;
            Some(lp.start as f64 + (next - lp.start as f64) % span)
        }
        _ if next >= len as f64 => None,
        _ => Some(next),
    }
}

/// Frames of source data consumed per output frame.
pub(super) fn step_for_period(period: f64, sample_rate: u32) -> f64 {
    if period <= 0.0 || sample_rate == 0 {
        return 0.0;
    }
    AMIGA_CLOCK / period / f64::from(sample_rate)
}

/// Left/right gains for a channel under Amiga LRRL placement.
///
/// `separation` is a percentage: 0 folds everything to the centre, 200 pans
/// hard left/right.
pub(super) fn pan_gains(channel: usize, separation: i32) -> (f32, f32) {
    let side = match channel % 4 {
        0 | 3 => -1.0,
        _ => 1.0,
    };
    let width = separation.clamp(0, 200) as f32 / 200.0;
    (0.5 * (1.0 - side * width), 0.5 * (1.0 + side * width))
}

/// Output gain that keeps a full-scale mix of every channel under clipping.
pub(super) fn master_gain(channels: usize) -> f32 {
    1.8 / channels.max(2) as f32
}

pub(super) fn to_i16(v: f32) -> i16 {
    (v.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAMP: [i8; 4] = [0, 64, -64, 32];

    #[test]
    fn nearest_and_linear_fetch() {
        assert_eq!(sample_at(&RAMP, 1.5, None, Interpolation::None), 0.5);
        assert_eq!(sample_at(&RAMP, 0.5, None, Interpolation::Linear), 0.25);
        assert_eq!(sample_at(&RAMP, 3.0, None, Interpolation::Linear), 0.25);
    }

    #[test]
    fn cubic_passes_through_sample_points() {
        let v = sample_at(&RAMP, 2.0, None, Interpolation::Cubic);
        assert!((v - (-0.5)).abs() < 1e-6);
    }

    #[test]
    fn loop_wraps_reads_and_positions() {
        let lp = Some(LoopRange { start: 1, end: 4 });
        assert_eq!(fetch(&RAMP, 4, lp), 0.5);
        assert_eq!(fetch(&RAMP, 6, lp), 0.25);
        let pos = advance(3.5, 1.0, 4, lp).unwrap();
        assert!((pos - 1.5).abs() < 1e-9);
    }

    #[test]
    fn one_shot_stops_at_end() {
        assert_eq!(advance(2.0, 1.0, 4, None), Some(3.0));
        assert_eq!(advance(3.0, 1.0, 4, None), None);
        assert_eq!(fetch(&RAMP, 9, None), 0.0);
    }

    #[test]
    fn lrrl_panning_scales_with_separation() {
        assert_eq!(pan_gains(0, 200), (1.0, 0.0));
        assert_eq!(pan_gains(1, 200), (0.0, 1.0));
        assert_eq!(pan_gains(2, 200), (0.0, 1.0));
        assert_eq!(pan_gains(3, 200), (1.0, 0.0));
        assert_eq!(pan_gains(0, 0), (0.5, 0.5));
        assert_eq!(pan_gains(1, 100), (0.25, 0.75));
        assert_eq!(pan_gains(1, 900), (0.0, 1.0));
    }

    #[test]
    fn period_step_matches_paula_rate() {
        let step = step_for_period(428.0, 44_100);
        assert!((step - 3_546_895.0 / 428.0 / 44_100.0).abs() < 1e-12);
        assert_eq!(step_for_period(0.0, 44_100), 0.0);
    }

    #[test]
    fn output_conversion_clips() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
        assert_eq!(to_i16(0.0), 0);
    }
}

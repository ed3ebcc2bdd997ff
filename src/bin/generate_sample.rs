use std::path::PathBuf;

use anyhow::{Context, Result};

use rusty_depot::product::kind::{CALIBRATION, CAMERA_FIELD, IMAGE_FRAME, SPECTRUM, TELEMETRY_TABLE};
use rusty_depot::product::views::{EXPOSURE_DURATION_FIELD, FILTER_NUMBER_FIELD};
use rusty_depot::sample::{self, LabelBuilder, SamplePayload};

const MISSION: &str = "urn:esa:psa:em16_rm_pan";

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn generate_spectrum(
    wavelengths: &[f64],
    peaks: &[(f64, f64, f64)],
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    wavelengths
        .iter()
        .map(|&wl| {
            let signal: f64 = peaks
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(wl, mu, sigma, amp))
                .sum();
            signal + rng.gauss(0.0, noise_level)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn noisy_frame(lines: usize, samples: usize, level: f64, rng: &mut SimpleRng) -> Vec<u16> {
    (0..lines * samples)
        .map(|_| rng.gauss(level, level * 0.02).clamp(0.0, u16::MAX as f64) as u16)
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();

    let out: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_depot"));
    let mut rng = SimpleRng::new(42);
    let mut written = 0usize;

    // Spectra: 400 → 1000 nm, step 2
    let wavelengths: Vec<f64> = (0..300).map(|i| 400.0 + i as f64 * 2.0).collect();
    let targets: [(&str, Vec<(f64, f64, f64)>); 3] = [
        ("basalt", vec![(450.0, 20.0, 0.3), (650.0, 40.0, 0.5), (930.0, 30.0, 0.2)]),
        ("regolith", vec![(520.0, 30.0, 0.6), (700.0, 50.0, 0.4)]),
        ("calcite", vec![(480.0, 15.0, 0.8), (880.0, 25.0, 0.5)]),
    ];
    for (i, (target, peaks)) in targets.iter().enumerate() {
        for repeat in 0..2 {
            let n = i * 2 + repeat;
            let values = generate_spectrum(&wavelengths, peaks, 0.005, &mut rng);
            LabelBuilder::new(format!("{MISSION}:data_partially_processed:spec_{n:04}"), SPECTRUM)
                .instrument("PanCam")
                .start_time(format!("2031-03-{:02}T10:{:02}:00Z", i + 1, repeat * 5))
                .field("Target_Identification/name", *target)
                .payload(SamplePayload::spectrum(&values))
                .write(&out.join("spectra"))
                .context("writing spectrum")?;
            written += 1;
        }
    }

    // Image frames and one flat per camera
    for (c, camera) in ["WACL", "WACR", "HRC"].into_iter().enumerate() {
        for filter in 1..=3 {
            let frame = noisy_frame(16, 16, 1000.0 * filter as f64, &mut rng);
            LabelBuilder::new(
                format!("{MISSION}:data_raw:{}_f{filter}", camera.to_lowercase()),
                IMAGE_FRAME,
            )
            .instrument("PanCam")
            .start_time(format!("2031-03-10T12:{:02}:00Z", c * 10 + filter))
            .field(CAMERA_FIELD, camera)
            .field(FILTER_NUMBER_FIELD, filter.to_string())
            .field(EXPOSURE_DURATION_FIELD, format!("{:.3}", 0.05 * filter as f64))
            .payload(SamplePayload::image(16, 16, &frame))
            .write(&out.join("frames").join(camera))
            .context("writing image frame")?;
            written += 1;
        }
        let flat = noisy_frame(16, 16, 30000.0, &mut rng);
        LabelBuilder::new(
            format!("{MISSION}:calibration:flat_{}", camera.to_lowercase()),
            CALIBRATION,
        )
        .instrument("PanCam")
        .field(CAMERA_FIELD, camera)
        .payload(SamplePayload::image(16, 16, &flat))
        .write(&out.join("calibration"))
        .context("writing flat")?;
        written += 1;
    }

    // Housekeeping: motion counters per sol
    for sol in 0..3 {
        let rows: Vec<(f64, &str)> = ["MAST/PTU", "MAST/TILT", "MAST/PAN"]
            .iter()
            .enumerate()
            .map(|(i, id)| (sol as f64 * 86400.0 + i as f64, *id))
            .collect();
        LabelBuilder::new(format!("{MISSION}:data_raw:hk_sol{sol:03}"), TELEMETRY_TABLE)
            .instrument("PanCam")
            .start_time(format!("2031-03-{:02}T00:00:00Z", sol + 1))
            .payload(SamplePayload::housekeeping(&rows))
            .write(&out.join("hk"))
            .context("writing housekeeping")?;
        written += 1;
    }

    sample::write_corrupt_label(&out.join("broken"), "corrupt").context("writing corrupt label")?;

    println!(
        "Wrote {written} products (plus one corrupt label) to {}",
        out.display()
    );
    Ok(())
}

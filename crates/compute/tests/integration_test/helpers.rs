use chrono::{Datelike, NaiveDate};
use voltwatch_core::{date_column, float_column, text_column, Frame, ModelKind, PipelineConfig};

pub const SPIKE_ENTITY: &str = "Ankara";
pub const OTHER_ENTITY: &str = "Bursa";
/// Month index (from January 2021) carrying the 10x spike.
pub const SPIKE_INDEX: usize = 20;

pub fn month_start(index: usize) -> NaiveDate {
    let year = 2021 + (index / 12) as i32;
    let month = (index % 12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).unwrap()
}

/// Seasonal temperature with a small upward drift per year.
pub fn temperature(index: usize) -> f64 {
    let date = month_start(index);
    let angle = 2.0 * std::f64::consts::PI * (date.month0() as f64) / 12.0;
    15.0 - 10.0 * angle.cos() + 0.5 * (index / 12) as f64
}

/// Deterministic noise in {-16, -8, 0, 8, 16}, unrelated to the calendar.
pub fn noise(index: usize) -> f64 {
    8.0 * (((7 * index) % 5) as f64 - 2.0)
}

/// Monthly consumption rows for the given entities.
///
/// `target = base + 20 * temp + noise`; the spike entity gets a 10x value at
/// [`SPIKE_INDEX`] when `spike` is set.
pub fn energy_frame(entities: &[(&str, f64, usize)], spike: bool) -> Frame {
    let mut names = Vec::new();
    let mut dates = Vec::new();
    let mut target = Vec::new();
    let mut temp = Vec::new();
    for &(name, base, months) in entities {
        for t in 0..months {
            let mut value = base + 20.0 * temperature(t) + noise(t);
            if spike && name == SPIKE_ENTITY && t == SPIKE_INDEX {
                value *= 10.0;
            }
            names.push(Some(name.to_string()));
            dates.push(Some(month_start(t)));
            target.push(Some(value));
            temp.push(Some(temperature(t)));
        }
    }
    Frame::from_columns(vec![
        text_column("Sehir", names),
        date_column("Donem", &dates).unwrap(),
        float_column("Genel_Toplam_MWh", target),
        float_column("temp", temp),
    ])
    .unwrap()
}

/// Two entities over 36 months, spike in the first.
pub fn reference_frame() -> Frame {
    energy_frame(&[(SPIKE_ENTITY, 1000.0, 36), (OTHER_ENTITY, 2000.0, 36)], true)
}

/// Robust linear model on calendar and temperature only.
pub fn linear_config() -> PipelineConfig {
    let mut config = PipelineConfig {
        lags: Vec::new(),
        rolling_windows: Vec::new(),
        ..PipelineConfig::default()
    };
    config.model.kind = ModelKind::Linear;
    config.model.huber_k = Some(1.345);
    config
}

/// Small forest for fast runs.
pub fn forest_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.model.n_estimators = 10;
    config
}

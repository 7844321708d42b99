use serde::Deserialize;
use serde::Serialize;

/// Operating mode of a timed relay, stored as its numeric code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Toggle every `interval` seconds
    TickEvery,
    /// Toggle once a day at `tickat`
    TickAt,
    /// Pulse for `pulsegap` seconds every `interval` seconds
    PulseEvery,
    /// Pulse for `pulsegap` seconds once a day at `tickat`
    PulseAt,
}

impl ScheduleMode {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ScheduleMode::TickEvery),
            1 => Some(ScheduleMode::TickAt),
            2 => Some(ScheduleMode::PulseEvery),
            3 => Some(ScheduleMode::PulseAt),
            _ => None,
        }
    }
}

/// A device's operating schedule
///
/// Replaced wholesale on every update, never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schedule {
    /// Mode code, see [`ScheduleMode`]
    pub config: u8,

    /// Clock time `HH:MM` for the clock-driven modes
    #[serde(default)]
    pub tickat: String,

    /// Pulse width in seconds
    #[serde(default)]
    pub pulsegap: u32,

    /// Period in seconds for the interval-driven modes
    #[serde(default)]
    pub interval: u32,
}

impl Schedule {
    pub fn mode(&self) -> Option<ScheduleMode> {
        ScheduleMode::from_code(self.config)
    }

    /// Whether all fields required by the mode are present and consistent
    pub fn is_valid(&self) -> bool {
        match self.mode() {
            None => false,
            Some(ScheduleMode::TickEvery) => self.interval > 0,
            Some(ScheduleMode::TickAt) => is_clock_time(&self.tickat),
            Some(ScheduleMode::PulseEvery) => {
                self.interval > 0 && self.pulsegap > 0 && self.pulsegap < self.interval
            }
            Some(ScheduleMode::PulseAt) => is_clock_time(&self.tickat) && self.pulsegap > 0,
        }
    }
}

fn is_clock_time(s: &str) -> bool {
    let Some((hh, mm)) = s.split_once(':') else {
        return false;
    };
    if hh.len() != 2 || mm.len() != 2 {
        return false;
    }
    match (hh.parse::<u8>(), mm.parse::<u8>()) {
        (Ok(h), Ok(m)) => h < 24 && m < 60,
        _ => false,
    }
}

use crate::assets::request::{PropValue, PropertyBag};
use crate::assets::worker::DEFAULT_WAIT_TIMEOUT;
use log::{info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

pub const CONFIG_PATH: &str = "gatherer.ini";
const GENERAL_SECTION: &str = "General";

// --- Minimal INI reader ---
// Sections keep file order and may repeat; each widget is its own section.
#[derive(Debug, Default)]
pub struct SimpleIni {
    sections: Vec<(String, HashMap<String, String>)>,
}

impl SimpleIni {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        self.parse(&content);
        Ok(())
    }

    pub fn parse(&mut self, content: &str) {
        self.sections.clear();

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            // Section header: [SectionName]
            if line.starts_with('[') && line.ends_with(']') && line.len() >= 2 {
                let name = line[1..line.len() - 1].trim().to_string();
                self.sections.push((name, HashMap::new()));
                continue;
            }

            // Key/value pair: key=value
            if let Some(eq_idx) = line.find('=') {
                let (key_raw, value_raw) = line.split_at(eq_idx);
                let key = key_raw.trim();
                if key.is_empty() {
                    continue;
                }
                // Skip '=' and trim whitespace from the value.
                let value = value_raw[1..].trim().to_string();
                if self.sections.is_empty() {
                    self.sections.push((String::new(), HashMap::new()));
                }
                if let Some((_, section)) = self.sections.last_mut() {
                    section.insert(key.to_string(), value);
                }
            }
        }
    }

    /// First occurrence of `key` in the first section named `section`.
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .and_then(|(_, s)| s.get(key))
            .cloned()
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &HashMap<String, String>)> {
        self.sections.iter().map(|(name, s)| (name.as_str(), s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Off => log::LevelFilter::Off,
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

/// A declarative widget: its type and loosely typed properties.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetConfig {
    pub kind: String,
    pub values: PropertyBag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_level: LogLevel,
    /// Upper bound on one idle wait of the async preload loop.
    pub worker_wait_seconds: u64,
    pub vsync: bool,
    pub widgets: Vec<WidgetConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Warn,
            worker_wait_seconds: DEFAULT_WAIT_TIMEOUT.as_secs(),
            vsync: true,
            widgets: Vec::new(),
        }
    }
}

impl Config {
    pub fn widgets_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a WidgetConfig> {
        self.widgets.iter().filter(move |w| w.kind == kind)
    }
}

// --- Value parsing ---

fn parse_channel(raw: &str) -> Option<f32> {
    raw.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

fn parse_hex_color(hex: &str) -> Option<[f32; 4]> {
    let hex = hex.trim();
    if hex.len() != 8 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let v = u32::from_str_radix(hex, 16).ok()?;
    Some(v.to_be_bytes().map(|c| f32::from(c) / 255.0))
}

/// Accepts `rgba(r, g, b, a)` with 0-255 channels and 0-1 alpha,
/// `rgb(r, g, b)`, `rgba(RRGGBBAA)`, or `0xAARRGGBB`.
pub fn parse_color(raw: &str) -> Option<[f32; 4]> {
    let s = raw.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let [a, r, g, b] = parse_hex_color(hex)?;
        return Some([r, g, b, a]);
    }

    let lower = s.to_ascii_lowercase();
    let (inner, has_alpha) = if let Some(rest) = lower.strip_prefix("rgba(") {
        (rest.strip_suffix(')')?, true)
    } else if let Some(rest) = lower.strip_prefix("rgb(") {
        (rest.strip_suffix(')')?, false)
    } else {
        return None;
    };

    if has_alpha && !inner.contains(',') {
        return parse_hex_color(inner);
    }

    let parts = inner.split(',').map(parse_channel).collect::<Option<Vec<_>>>()?;
    match (parts.as_slice(), has_alpha) {
        ([r, g, b, a], true) => Some([r / 255.0, g / 255.0, b / 255.0, a.clamp(0.0, 1.0)]),
        ([r, g, b], false) => Some([r / 255.0, g / 255.0, b / 255.0, 1.0]),
        _ => None,
    }
    .map(|c| c.map(|v| v.clamp(0.0, 1.0)))
}

/// Known keys get typed values; anything else stays a string.
fn parse_prop_value(key: &str, raw: &str) -> PropValue {
    match key {
        "font_size" => match raw.trim().parse::<i64>() {
            Ok(v) => PropValue::Int(v),
            Err(_) => {
                warn!("Invalid font_size '{raw}'; keeping it as text.");
                PropValue::Str(raw.to_string())
            }
        },
        "color" => match parse_color(raw) {
            Some(c) => PropValue::Color(c),
            None => {
                warn!("Invalid color '{raw}'; keeping it as text.");
                PropValue::Str(raw.to_string())
            }
        },
        _ => PropValue::Str(raw.to_string()),
    }
}

pub fn from_ini(conf: &SimpleIni) -> Config {
    let default = Config::default();
    let log_level = conf
        .get(GENERAL_SECTION, "LogLevel")
        .and_then(|v| LogLevel::from_str(&v).ok())
        .unwrap_or(default.log_level);
    let worker_wait_seconds = conf
        .get(GENERAL_SECTION, "WorkerWaitSeconds")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default.worker_wait_seconds);
    let vsync = conf
        .get(GENERAL_SECTION, "Vsync")
        .and_then(|v| v.parse::<u8>().ok())
        .map_or(default.vsync, |v| v != 0);

    let widgets = conf
        .sections()
        .filter(|(name, _)| !name.is_empty() && !name.eq_ignore_ascii_case(GENERAL_SECTION))
        .map(|(name, values)| {
            let mut bag = PropertyBag::new();
            for (key, raw) in values {
                bag.insert(key.clone(), parse_prop_value(key, raw));
            }
            WidgetConfig {
                kind: name.to_ascii_lowercase(),
                values: bag,
            }
        })
        .collect();

    Config {
        log_level,
        worker_wait_seconds,
        vsync,
        widgets,
    }
}

pub fn parse(text: &str) -> Config {
    let mut conf = SimpleIni::new();
    conf.parse(text);
    from_ini(&conf)
}

/// Missing or unreadable files fall back to defaults with no widgets.
pub fn load<P: AsRef<Path>>(path: P) -> Config {
    let path = path.as_ref();
    if !path.exists() {
        info!("'{}' not found, using default values.", path.display());
        return Config::default();
    }

    let mut conf = SimpleIni::new();
    match conf.load(path) {
        Ok(()) => {
            let cfg = from_ini(&conf);
            info!(
                "Loaded '{}': {} widget(s).",
                path.display(),
                cfg.widgets.len()
            );
            cfg
        }
        Err(e) => {
            warn!("Failed to read '{}': {e}. Using defaults.", path.display());
            Config::default()
        }
    }
}

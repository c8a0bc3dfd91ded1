//! Ordered fallback search across vendor-specific sources.
//!
//! A metric family with several possible hardware backends is described by a
//! static list of [`VendorSource`] entries. [`ProbeChain::resolve`] walks the
//! list in order and accepts the first backend for which at least one field
//! parses. Later backends are never consulted once an earlier one is accepted,
//! even if they would resolve more fields.

use std::collections::BTreeMap;

use crate::metric::Metric;
use crate::reader::{SourceReader, parse_first_i64, parse_percent, parse_temperature};

/// Native unit of a frequency source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqUnit {
    Hz,
    KHz,
    MHz,
}

impl FreqUnit {
    /// Convert a raw reading to whole MHz.
    pub fn to_mhz(self, raw: i64) -> i64 {
        match self {
            Self::Hz => raw / 1_000_000,
            Self::KHz => raw / 1_000,
            Self::MHz => raw,
        }
    }
}

/// How the text of one source is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Integer frequency, reported in MHz.
    Frequency(FreqUnit),
    /// `NN`, `NN.N` or `NN %`.
    Percent,
    /// Degrees Celsius or millidegrees.
    Temperature,
    /// First line, verbatim.
    Text,
}

/// One field of a backend: where to read it and how to parse it.
#[derive(Debug, Clone, Copy)]
pub struct FieldSource {
    pub field: &'static str,
    /// Path relative to the sys root.
    pub path: &'static str,
    pub kind: FieldKind,
}

/// A candidate backend.
#[derive(Debug, Clone, Copy)]
pub struct VendorSource {
    pub id: &'static str,
    pub vendor: &'static str,
    pub name: &'static str,
    pub fields: &'static [FieldSource],
}

/// A parsed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl FieldSource {
    fn parse(&self, text: &str) -> Option<FieldValue> {
        match self.kind {
            FieldKind::Frequency(unit) => {
                let raw = parse_first_i64(text)?;
                (raw >= 0).then(|| FieldValue::Integer(unit.to_mhz(raw)))
            }
            FieldKind::Percent => parse_percent(text).map(FieldValue::Decimal),
            FieldKind::Temperature => parse_temperature(text).map(FieldValue::Decimal),
            FieldKind::Text => text
                .lines()
                .next()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| FieldValue::Text(l.to_string())),
        }
    }
}

/// Result of walking a chain: the winning backend (if any) and its fields.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcome {
    backend: Option<&'static VendorSource>,
    fields: BTreeMap<&'static str, FieldValue>,
}

impl ProbeOutcome {
    pub fn backend(&self) -> Option<&'static VendorSource> {
        self.backend
    }

    pub fn resolved_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn integer(&self, field: &str) -> Metric<i64> {
        match self.fields.get(field) {
            Some(FieldValue::Integer(v)) => Metric::Known(*v),
            _ => Metric::Unknown,
        }
    }

    pub fn decimal(&self, field: &str) -> Metric<f64> {
        match self.fields.get(field) {
            Some(FieldValue::Decimal(v)) => Metric::Known(*v),
            Some(FieldValue::Integer(v)) => Metric::Known(*v as f64),
            _ => Metric::Unknown,
        }
    }

    pub fn text(&self, field: &str) -> Metric<String> {
        match self.fields.get(field) {
            Some(FieldValue::Text(v)) => Metric::Known(v.clone()),
            _ => Metric::Unknown,
        }
    }
}

/// An ordered, immutable list of backends for one metric family.
#[derive(Debug, Clone, Copy)]
pub struct ProbeChain {
    family: &'static str,
    sources: &'static [VendorSource],
}

impl ProbeChain {
    pub const fn new(family: &'static str, sources: &'static [VendorSource]) -> Self {
        Self { family, sources }
    }

    pub fn sources(&self) -> &'static [VendorSource] {
        self.sources
    }

    /// Accept the first backend that yields at least one parsed field.
    pub fn resolve(&self, reader: &SourceReader) -> ProbeOutcome {
        for source in self.sources {
            let mut fields = BTreeMap::new();
            for field in source.fields {
                let Some(text) = reader.read_sys(field.path) else {
                    continue;
                };
                match field.parse(&text) {
                    Some(value) => {
                        fields.insert(field.field, value);
                    }
                    None => log::debug!(
                        "{}: {} field {} unparsable: {text:?}",
                        self.family,
                        source.id,
                        field.field
                    ),
                }
            }
            if !fields.is_empty() {
                log::debug!(
                    "{}: backend {} resolved {} field(s)",
                    self.family,
                    source.id,
                    fields.len()
                );
                return ProbeOutcome {
                    backend: Some(source),
                    fields,
                };
            }
        }
        log::debug!("{}: no backend resolved", self.family);
        ProbeOutcome::default()
    }
}

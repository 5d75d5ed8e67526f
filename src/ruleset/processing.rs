//! Data-processing directives: what the orchestrator does with parsed plates.

use crate::fit::Peak;
use serde::{Deserialize, Serialize};

/// The assay families the pipeline knows how to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssayKind {
    SingleDose,
    DoseResponse,
    DoseResponseTimeCourse,
    ThermalShift,
    Rate,
}

impl AssayKind {
    /// Four-letter shorthand code. Thermal-shift assays split on category:
    /// nanoDSF instruments report intrinsic fluorescence (`NDSF`), everything
    /// else is dye-based (`DSF`).
    pub fn shorthand(&self, category: &str) -> &'static str {
        match self {
            Self::SingleDose => "EPSD",
            Self::DoseResponse => "EPDR",
            Self::DoseResponseTimeCourse => "DRTC",
            Self::ThermalShift => {
                if category.eq_ignore_ascii_case("nanodsf") {
                    "NDSF"
                } else {
                    "DSF"
                }
            }
            Self::Rate => "RATE",
        }
    }

    pub fn from_shorthand(code: &str) -> Option<Self> {
        match code {
            "EPSD" => Some(Self::SingleDose),
            "EPDR" => Some(Self::DoseResponse),
            "DRTC" => Some(Self::DoseResponseTimeCourse),
            "NDSF" | "DSF" => Some(Self::ThermalShift),
            "RATE" => Some(Self::Rate),
            _ => None,
        }
    }

    /// Parse the long-form type string used by legacy detail files.
    pub fn parse_legacy(assay_type: &str) -> Option<Self> {
        match assay_type {
            "single_dose" => Some(Self::SingleDose),
            "dose_response" => Some(Self::DoseResponse),
            "dose_response_time_course" => Some(Self::DoseResponseTimeCourse),
            "thermal_shift" => Some(Self::ThermalShift),
            "rate" => Some(Self::Rate),
            _ => None,
        }
    }
}

/// Which well population supplies the background value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BackgroundSource {
    Control,
    Solvent,
    Buffer,
}

/// Ratio leaves `(Raw−Bkg)/(Ref−Bkg)` as a fraction; Percent scales by 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum NormalisationKind {
    Ratio,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Normalisation {
    pub kind: NormalisationKind,
    /// Flip the normalised response (inhibition read as activity and vice
    /// versa).
    pub invert: bool,
}

impl Default for Normalisation {
    fn default() -> Self {
        Self {
            kind: NormalisationKind::Percent,
            invert: false,
        }
    }
}

/// Replicate grouping policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ReplicatePolicy {
    /// Group replicate wells within each plate.
    SamePlate,
    /// Group wells across plates sharing one layout block.
    AcrossPlates,
}

/// Display / fit mode of a sample record. On the wire: `0` raw, `1` free
/// normalised fit, `2` constrained normalised fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ShowMode {
    Raw,
    NormFree,
    NormConst,
}

impl TryFrom<u8> for ShowMode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Raw),
            1 => Ok(Self::NormFree),
            2 => Ok(Self::NormConst),
            other => Err(format!("show mode must be 0, 1, or 2, got {}", other)),
        }
    }
}

impl From<ShowMode> for u8 {
    fn from(mode: ShowMode) -> Self {
        match mode {
            ShowMode::Raw => 0,
            ShowMode::NormFree => 1,
            ShowMode::NormConst => 2,
        }
    }
}

/// Which reading of the raw file is the assay signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", rename_all_fields = "PascalCase")]
pub enum SignalSelect {
    /// One dataset, one sub-dataset.
    Single { dataset: usize, sub: usize },
    /// Per-well ratio of two datasets (nanoDSF 350 nm / 330 nm).
    Ratio {
        numerator: usize,
        denominator: usize,
        sub: usize,
    },
}

impl Default for SignalSelect {
    fn default() -> Self {
        Self::Single { dataset: 0, sub: 0 }
    }
}

/// How thermal-shift traces are analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ThermalMethod {
    /// Boltzmann sigmoid on the trimmed transition.
    Boltzmann,
    /// Extremum of the smoothed first derivative.
    Derivative,
    /// Two baselines joined by a van 't Hoff transition.
    Thompson,
}

/// A user-authored fit equation, compiled by `fit::custom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomEquationSpec {
    /// Expression over the independent variable and parameters.
    pub function: String,
    /// Ordered parameter names.
    pub parameters: Vec<String>,
    /// Independent variable name.
    pub independent: String,
}

/// Per-assay processing directives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DataProcessing {
    pub assay_kind: AssayKind,
    /// Instrument family, e.g. `nanoDSF`; feeds the shorthand code.
    pub assay_category: String,
    /// Sample identifier that marks control wells.
    pub control_name: Option<String>,
    pub background: BackgroundSource,
    /// Fall back to the other of solvent/buffer when the primary population
    /// is absent.
    pub background_backup: bool,
    pub normalisation: Normalisation,
    pub replicates: ReplicatePolicy,
    pub enabled_modes: Vec<ShowMode>,
    pub default_show: ShowMode,
    pub signal: SignalSelect,
    pub thermal_method: ThermalMethod,
    /// Which extremum of the derivative trace marks the melting temperature.
    pub tm_peak: Peak,
    /// Explicit `[start, stop]` window for rate fits; `None` selects the
    /// window automatically.
    pub rate_window: Option<(f64, f64)>,
    pub custom_equation: Option<CustomEquationSpec>,
}

impl Default for DataProcessing {
    fn default() -> Self {
        Self {
            assay_kind: AssayKind::DoseResponse,
            assay_category: String::new(),
            control_name: None,
            background: BackgroundSource::Control,
            background_backup: true,
            normalisation: Normalisation::default(),
            replicates: ReplicatePolicy::SamePlate,
            enabled_modes: vec![ShowMode::Raw, ShowMode::NormFree, ShowMode::NormConst],
            default_show: ShowMode::Raw,
            signal: SignalSelect::default(),
            thermal_method: ThermalMethod::Boltzmann,
            tm_peak: Peak::Max,
            rate_window: None,
            custom_equation: None,
        }
    }
}

impl DataProcessing {
    pub fn shorthand(&self) -> &'static str {
        self.assay_kind.shorthand(&self.assay_category)
    }
}

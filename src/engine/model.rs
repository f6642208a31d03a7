use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Methodology a project is evaluated under. Recorded on every entry at write
/// time so a later project edit never retroactively changes a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Methodology {
    M1,
    M2,
    M3,
}

impl Methodology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Methodology::M1 => "M1",
            Methodology::M2 => "M2",
            Methodology::M3 => "M3",
        }
    }
}

impl std::str::FromStr for Methodology {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "M1" => Ok(Methodology::M1),
            "M2" => Ok(Methodology::M2),
            "M3" => Ok(Methodology::M3),
            other => Err(format!("unknown methodology: {other}")),
        }
    }
}

/// A unit item contributing to M1's ABD/APD/ALD sequences (and M2's ALD).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitItem {
    pub label: String,
    pub value: f64,
    pub ef: f64,
    pub gwp: f64,
    pub af: f64,
    pub uncertainty_pct: f64,
}

impl UnitItem {
    /// `value * EF * GWP * AF`, scaled by `(1 + uncertaintyPct/100)`.
    pub fn raw_with_uncertainty(&self) -> f64 {
        let raw = self.value * self.ef * self.gwp * self.af;
        raw * (1.0 + self.uncertainty_pct / 100.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct M1Params {
    pub abd: Vec<UnitItem>,
    pub apd: Vec<UnitItem>,
    pub ald: Vec<UnitItem>,
    pub buffer_percent: f64,
    #[serde(default)]
    pub derived: M1Derived,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct M1Derived {
    pub be: f64,
    pub pe: f64,
    pub le: f64,
    pub buffer_emission: f64,
    pub er: f64,
    pub capd: f64,
    pub emission_reduction_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableRole {
    Frozen,
    Realtime,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    Monthly,
    Quarterly,
    Semiannual,
    Yearly,
}

/// One period record in a frozen variable's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub value: f64,
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulePolicy {
    pub frequency: ScheduleFrequency,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariablePolicy {
    pub is_constant: bool,
    pub schedule: Option<SchedulePolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenVar {
    pub value: f64,
    pub policy: VariablePolicy,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaRef {
    pub formula_id: String,
    pub version: u32,
    pub variable_kinds: BTreeMap<String, VariableRole>,
    pub variables: BTreeMap<String, FrozenVar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct M2Params {
    #[serde(default)]
    pub ald: Vec<UnitItem>,
    pub formula_ref: Option<FormulaRef>,
    #[serde(default)]
    pub le: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ProjectActivity {
    Reduction,
    Removal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum M3VariableType {
    Constant,
    Manual,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: M3VariableType,
    pub value: Option<f64>,
    #[serde(default)]
    pub internal_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3Item {
    pub id: String,
    pub label: String,
    pub formula_id: String,
    pub variables: Vec<M3Variable>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct M3Params {
    pub project_activity: Option<ProjectActivity>,
    pub buffer_percent: f64,
    pub baseline: Vec<M3Item>,
    pub project: Vec<M3Item>,
    pub leakage: Vec<M3Item>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InputType {
    Manual,
    #[serde(rename = "API")]
    Api,
    #[serde(rename = "IOT")]
    Iot,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Manual => "manual",
            InputType::Api => "API",
            InputType::Iot => "IOT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyRequestStatus {
    None,
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionChannelState {
    pub input_type: InputType,
    pub original_input_type: Option<String>,
    pub api_endpoint: Option<String>,
    pub iot_device_id: Option<String>,
    pub api_status: bool,
    pub iot_status: bool,
    pub api_key_request_status: ApiKeyRequestStatus,
    /// SHA-256 hex digest of the approved API key. The plaintext key is
    /// handed back once, at approval time, and never stored.
    pub api_key_hash: Option<String>,
}

impl Default for IngestionChannelState {
    fn default() -> Self {
        Self {
            input_type: InputType::Manual,
            original_input_type: None,
            api_endpoint: None,
            iot_device_id: None,
            api_status: false,
            iot_status: false,
            api_key_request_status: ApiKeyRequestStatus::None,
            api_key_hash: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project_name: String,
    pub category: Option<String>,
    pub scope: Option<String>,
    pub location_place: Option<String>,
    pub location_address: Option<String>,
    pub location_lat_lon: Option<String>,
}

impl ProjectMetadata {
    /// `place || address || "lat,lon" || "Unknown"`, per §4.7.
    pub fn location_key(&self) -> String {
        self.location_place
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.location_address.clone().filter(|s| !s.is_empty()))
            .or_else(|| self.location_lat_lon.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub client_id: String,
    pub project_id: String,
    pub methodology: Methodology,
    pub metadata: ProjectMetadata,
    #[serde(default)]
    pub m1: M1Params,
    #[serde(default)]
    pub m2: M2Params,
    #[serde(default)]
    pub m3: M3Params,
    #[serde(default)]
    pub channel: IngestionChannelState,
    pub is_deleted: bool,
}

/// Canonical `{date, time, timestamp}` produced by the Time Normalizer (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedTime {
    pub date: String,
    pub time: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDetails {
    pub uploaded_by: Option<String>,
    pub data_source: String,
    pub api_endpoint: Option<String>,
    pub iot_device_id: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3Breakdown {
    pub baseline: Vec<(String, f64)>,
    pub project: Vec<(String, f64)>,
    pub leakage: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3Detail {
    pub be_total: f64,
    pub pe_total: f64,
    pub le_total: f64,
    pub buffer_percent: f64,
    pub net_without_uncertainty: f64,
    pub net_with_uncertainty: f64,
    pub breakdown: M3Breakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "methodology")]
pub enum EntryPayload {
    M1 {
        input_value: f64,
        emission_reduction_rate: f64,
    },
    M2 {
        formula_id: String,
        variables: BTreeMap<String, f64>,
        net_reduction_in_formula: f64,
    },
    M3 {
        detail: M3Detail,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetReductionEntry {
    pub id: String,
    pub client_id: String,
    pub project_id: String,
    pub methodology: Methodology,
    pub input_type: InputType,
    pub original_input_type: String,
    pub source: SourceDetails,
    pub date: String,
    pub time: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EntryPayload,
    pub net_reduction: f64,
    pub cumulative_net_reduction: f64,
    pub high_net_reduction: f64,
    pub low_net_reduction: f64,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    pub id: String,
    pub name: String,
    pub expression: String,
    pub variables: Vec<FormulaVariable>,
    pub version: u32,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaVariable {
    pub name: String,
    pub default_value: Option<f64>,
    pub unit: Option<String>,
}

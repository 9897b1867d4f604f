//! Models for the controller's JSON payloads.
//!
//! Field names on the wire are the controller's short uppercase keys
//! (`SYSID`, `ETEMP`, `DP`, ...); everything is renamed to something readable
//! on the Rust side. All fields default to their zero value so a firmware
//! that omits a key does not fail the whole poll.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =====================
// Two-valued mode enums
// =====================

/// Heating/cooling mode, `0` = heating and `1` = cooling on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum HeatingCooling {
    #[default]
    Heating,
    Cooling,
}

impl serde::Serialize for HeatingCooling {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let n: i32 = match self {
            HeatingCooling::Heating => 0,
            HeatingCooling::Cooling => 1,
        };
        serializer.serialize_i32(n)
    }
}

impl<'de> serde::Deserialize<'de> for HeatingCooling {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;
        impl<'de> serde::de::Visitor<'de> for V {
            type Value = HeatingCooling;

            fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, "an integer 0 or 1 for HeatingCooling")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match value {
                    0 => Ok(HeatingCooling::Heating),
                    1 => Ok(HeatingCooling::Cooling),
                    other => Err(E::custom(format!("invalid HeatingCooling value: {}", other))),
                }
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_i64(value as i64)
            }
        }
        deserializer.deserialize_i64(V)
    }
}

/// Comfort/eco mode, `0` = comfort and `1` = eco on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum ComfortEco {
    #[default]
    Comfort,
    Eco,
}

impl serde::Serialize for ComfortEco {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let n: i32 = match self {
            ComfortEco::Comfort => 0,
            ComfortEco::Eco => 1,
        };
        serializer.serialize_i32(n)
    }
}

impl<'de> serde::Deserialize<'de> for ComfortEco {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;
        impl<'de> serde::de::Visitor<'de> for V {
            type Value = ComfortEco;

            fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, "an integer 0 or 1 for ComfortEco")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match value {
                    0 => Ok(ComfortEco::Comfort),
                    1 => Ok(ComfortEco::Eco),
                    other => Err(E::custom(format!("invalid ComfortEco value: {}", other))),
                }
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_i64(value as i64)
            }
        }
        deserializer.deserialize_i64(V)
    }
}

// =====================
// Poll payload
// =====================

/// One full poll of a controller: global state plus the per-room map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataPollResponse {
    #[serde(rename = "SYSID", default)]
    pub sys_id: String,
    #[serde(rename = "SERVICE", default)]
    pub service: i64,
    #[serde(rename = "VER", default)]
    pub version: String,
    #[serde(rename = "HC", default)]
    pub heating_cooling: HeatingCooling,
    #[serde(rename = "CE", default)]
    pub comfort_eco: ComfortEco,
    #[serde(rename = "ON", default)]
    pub on: i64,
    #[serde(rename = "ETEMP", default)]
    pub external_temperature: f64,
    #[serde(rename = "WTEMP", default)]
    pub water_temperature: f64,
    #[serde(rename = "PUMP", default)]
    pub pump: i64,
    #[serde(rename = "ERR", default)]
    pub error: i64,
    #[serde(rename = "OVERHEAT", default)]
    pub overheat_warning: i64,
    #[serde(rename = "WFROST", default)]
    pub frost_warning: i64,
    #[serde(rename = "XAH", default)]
    pub heating_target_temperature: f64,
    #[serde(rename = "XAC", default)]
    pub cooling_target_temperature: f64,
    #[serde(rename = "ECOH", default)]
    pub eco_heating_target_temperature: f64,
    #[serde(rename = "ECOC", default)]
    pub eco_cooling_target_temperature: f64,
    #[serde(rename = "SIG", default)]
    pub signal: i64,
    #[serde(rename = "SW", default)]
    pub software: i64,
    #[serde(rename = "EMAIL", default)]
    pub email: String,
    #[serde(rename = "TZ", default)]
    pub timezone: String,
    #[serde(rename = "DP", default)]
    pub thermostats: BTreeMap<String, Thermostat>,
}

impl DataPollResponse {
    /// Selects the active target temperature from the controller's
    /// heating/cooling and comfort/eco state.
    pub fn target_temperature(&self) -> f64 {
        match (self.heating_cooling, self.comfort_eco) {
            (HeatingCooling::Heating, ComfortEco::Comfort) => self.heating_target_temperature,
            (HeatingCooling::Heating, ComfortEco::Eco) => self.eco_heating_target_temperature,
            (HeatingCooling::Cooling, ComfortEco::Comfort) => self.cooling_target_temperature,
            (HeatingCooling::Cooling, ComfortEco::Eco) => self.eco_cooling_target_temperature,
        }
    }
}

/// One thermostat ("room") entry of the `DP` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thermostat {
    #[serde(rename = "ON", default)]
    pub enabled: i64,
    #[serde(rename = "IHC", default)]
    pub ihc: i64,
    #[serde(rename = "LIVE", default)]
    pub live: i64,
    #[serde(rename = "TEMP", default)]
    pub temperature: f64,
    #[serde(rename = "RH", default)]
    pub relative_humidity: f64,
    #[serde(rename = "DEW", default)]
    pub dew_temperature: f64,
    #[serde(rename = "LIM", default)]
    pub manual_range: f64,
    #[serde(rename = "DWP", default)]
    pub dwp: i64,
    #[serde(rename = "FROST", default)]
    pub frost_warning: i64,
    #[serde(rename = "CE", default)]
    pub comfort_eco: ComfortEco,
    #[serde(rename = "HC", default)]
    pub heating_cooling: HeatingCooling,
    #[serde(rename = "DI", default)]
    pub open_window_input: i64,
    #[serde(rename = "XAH", default)]
    pub heating_target_temperature: f64,
    #[serde(rename = "XAC", default)]
    pub cooling_target_temperature: f64,
    #[serde(rename = "ECOH", default)]
    pub eco_heating_target_temperature: f64,
    #[serde(rename = "ECOC", default)]
    pub eco_cooling_target_temperature: f64,
    #[serde(rename = "PL", default)]
    pub parental_lock: i64,
    #[serde(rename = "CEF", default)]
    pub cef: i64,
    #[serde(rename = "CEC", default)]
    pub cec: i64,
    #[serde(rename = "DXH", default)]
    pub reg_b_heating: i64,
    #[serde(rename = "DXC", default)]
    pub reg_b_cooling: i64,
    #[serde(rename = "OUT", default)]
    pub relay: i64,
    #[serde(rename = "WP", default)]
    pub wp: i64,
    #[serde(rename = "MV", default)]
    pub mv: i64,
    #[serde(rename = "TPR", default)]
    pub tpr: i64,
    #[serde(rename = "NAME", default)]
    pub name: String,
}

impl Thermostat {
    pub fn is_enabled(&self) -> bool {
        self.enabled != 0
    }

    pub fn is_live(&self) -> bool {
        self.live != 0
    }

    pub fn relay_on(&self) -> bool {
        self.relay > 0
    }

    /// Selects the active target temperature from the room's own
    /// heating/cooling and comfort/eco state, which is independent of the
    /// controller-level one.
    pub fn target_temperature(&self) -> f64 {
        match (self.heating_cooling, self.comfort_eco) {
            (HeatingCooling::Heating, ComfortEco::Comfort) => self.heating_target_temperature,
            (HeatingCooling::Heating, ComfortEco::Eco) => self.eco_heating_target_temperature,
            (HeatingCooling::Cooling, ComfortEco::Comfort) => self.cooling_target_temperature,
            (HeatingCooling::Cooling, ComfortEco::Eco) => self.eco_cooling_target_temperature,
        }
    }
}

// =====================
// Action responses
// =====================

pub const ACTION_RESULT_SUCCESS: &str = "success";

/// Verdict returned for login and settings forms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub refresh: bool,
    #[serde(default)]
    pub errors: BTreeMap<String, Value>,
}

impl ActionResponse {
    pub fn is_success(&self) -> bool {
        self.result == ACTION_RESULT_SUCCESS
    }

    /// Flattens the `errors` map into a single human-readable message.
    pub fn error_message(&self) -> String {
        let mut parts = Vec::with_capacity(self.errors.len());
        for (field, detail) in &self.errors {
            let detail = match detail {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            parts.push(format!("{} {}", field, detail));
        }
        parts.join(", ")
    }
}

// =====================
// Settings forms (write path)
// =====================

/// Per-room settings form, keyed by the room's signal number.
pub type ThermostatSettings = BTreeMap<i32, ThermostatSetting>;

/// Room settings as accepted by the `thermos_data` form.
#[derive(Debug, Clone, Default)]
pub struct ThermostatSetting {
    pub heating_cooling: bool,
    pub installed: bool,
    pub eco_cooling_target_temperature: f64,
    pub eco_heating_target_temperature: f64,
    pub cooling_target_temperature: f64,
    pub heating_target_temperature: f64,
    pub cef: bool,
    pub cec: bool,
    pub name: String,
    pub manual_range: f64,
    pub reg_b_heating: f64,
    pub reg_b_cooling: f64,
}

impl ThermostatSetting {
    fn form_values(&self, tab: i32, signal: i32) -> Vec<(String, String)> {
        let id = format!("{}_{}", tab, signal);
        let mut data = vec![
            (format!("cooling@{}", id), format!("{:.1}", self.cooling_target_temperature)),
            (format!("heating@{}", id), format!("{:.1}", self.heating_target_temperature)),
            (format!("ecoc@{}", id), format!("{:.1}", self.eco_cooling_target_temperature)),
            (format!("ecoh@{}", id), format!("{:.1}", self.eco_heating_target_temperature)),
            (format!("name@{}", id), self.name.clone()),
            (format!("lim@{}", id), format!("{:.1}", self.manual_range)),
            (format!("dxh@{}", id), format!("{:.1}", self.reg_b_heating)),
            (format!("dxc@{}", id), format!("{:.1}", self.reg_b_cooling)),
        ];
        if self.heating_cooling {
            data.push((format!("hc@{}", id), "on".to_string()));
        }
        if self.installed {
            data.push((format!("installed@{}", id), "on".to_string()));
        }
        if self.cef {
            data.push((format!("cef@{}", id), "on".to_string()));
        }
        if self.cec {
            data.push((format!("cec@{}", id), "on".to_string()));
        }
        data
    }
}

/// Builds the complete `thermos_data` form for a tab.
pub fn thermostat_settings_form(tab: i32, settings: &ThermostatSettings) -> Vec<(String, String)> {
    let mut data = Vec::new();
    for (signal, setting) in settings {
        data.extend(setting.form_values(tab, *signal));
    }
    data.push(("tab".to_string(), tab.to_string()));
    data.push(("form".to_string(), "thermos_data".to_string()));
    data
}

/// Controller-level settings as accepted by the `general` form.
#[derive(Debug, Clone, Default)]
pub struct GeneralSettings {
    pub comfort_eco_mode: String,
    pub comfort_eco_tab: i32,
    pub comfort_eco_signal: i32,
    pub heating_cooling_mode: String,
    pub heating_cooling_tab: i32,
    pub heating_cooling_signal: i32,
    pub heating_target_temperature: i32,
    pub cooling_target_temperature: i32,
    pub eco_heating_target_temperature: i32,
    pub eco_cooling_target_temperature: i32,
}

impl GeneralSettings {
    pub fn form_values(&self, tab: i32) -> Vec<(String, String)> {
        vec![
            ("func@ce_0".to_string(), self.comfort_eco_mode.clone()),
            ("icon@ce_0".to_string(), self.comfort_eco_tab.to_string()),
            ("signal@ce_0".to_string(), self.comfort_eco_signal.to_string()),
            ("func@hc_0".to_string(), self.heating_cooling_mode.clone()),
            ("icon@hc_0".to_string(), self.heating_cooling_tab.to_string()),
            ("signal@hc_0".to_string(), self.heating_cooling_signal.to_string()),
            ("xah".to_string(), self.heating_target_temperature.to_string()),
            ("xac".to_string(), self.cooling_target_temperature.to_string()),
            ("ecoh".to_string(), self.eco_heating_target_temperature.to_string()),
            ("ecoc".to_string(), self.eco_cooling_target_temperature.to_string()),
            ("tab".to_string(), tab.to_string()),
            ("form".to_string(), "general".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_datapoll_fixture() -> DataPollResponse {
        let json = std::fs::read_to_string("tests/data/datapoll.json").expect("fixture present");
        serde_json::from_str(&json).expect("parse datapoll response")
    }

    #[test]
    fn parses_datapoll_fixture() {
        let values = load_datapoll_fixture();
        assert_eq!(values.sys_id, "123456789012");
        assert_eq!(values.heating_cooling, HeatingCooling::Heating);
        assert_eq!(values.comfort_eco, ComfortEco::Comfort);
        assert_eq!(values.external_temperature, 4.5);
        assert_eq!(values.water_temperature, 38.0);
        assert_eq!(values.thermostats.len(), 2);

        let kitchen = values.thermostats.get("1").expect("room 1 present");
        assert!(kitchen.is_enabled());
        assert!(kitchen.is_live());
        assert_eq!(kitchen.name, "Kitchen");
        assert_eq!(kitchen.temperature, 21.5);
        assert_eq!(kitchen.relative_humidity, 45.0);
        assert!(kitchen.relay_on());

        let attic = values.thermostats.get("8").expect("room 8 present");
        assert!(!attic.is_enabled());
    }

    #[test]
    fn global_target_temperature_follows_mode_table() {
        let mut values = load_datapoll_fixture();
        values.heating_target_temperature = 22.0;
        values.eco_heating_target_temperature = 18.0;
        values.cooling_target_temperature = 24.0;
        values.eco_cooling_target_temperature = 28.0;

        let cases = [
            (HeatingCooling::Heating, ComfortEco::Comfort, 22.0),
            (HeatingCooling::Heating, ComfortEco::Eco, 18.0),
            (HeatingCooling::Cooling, ComfortEco::Comfort, 24.0),
            (HeatingCooling::Cooling, ComfortEco::Eco, 28.0),
        ];
        for (hc, ce, expected) in cases {
            values.heating_cooling = hc;
            values.comfort_eco = ce;
            assert_eq!(values.target_temperature(), expected, "{:?}/{:?}", hc, ce);
        }
    }

    #[test]
    fn room_target_temperature_follows_its_own_modes() {
        let mut room = Thermostat {
            heating_target_temperature: 21.0,
            eco_heating_target_temperature: 17.5,
            cooling_target_temperature: 25.0,
            eco_cooling_target_temperature: 27.5,
            ..Thermostat::default()
        };

        let cases = [
            (HeatingCooling::Heating, ComfortEco::Comfort, 21.0),
            (HeatingCooling::Heating, ComfortEco::Eco, 17.5),
            (HeatingCooling::Cooling, ComfortEco::Comfort, 25.0),
            (HeatingCooling::Cooling, ComfortEco::Eco, 27.5),
        ];
        for (hc, ce, expected) in cases {
            room.heating_cooling = hc;
            room.comfort_eco = ce;
            assert_eq!(room.target_temperature(), expected, "{:?}/{:?}", hc, ce);
        }
    }

    #[test]
    fn rejects_out_of_range_mode_values() {
        assert!(serde_json::from_str::<HeatingCooling>("2").is_err());
        assert!(serde_json::from_str::<ComfortEco>("-1").is_err());
        assert_eq!(serde_json::from_str::<HeatingCooling>("1").unwrap(), HeatingCooling::Cooling);
    }

    #[test]
    fn failed_action_synthesizes_message_from_errors() {
        let response: ActionResponse =
            serde_json::from_str(r#"{"result":"failure","refresh":false,"errors":{"password":"invalid"}}"#)
                .expect("parse action response");
        assert!(!response.is_success());
        let message = response.error_message();
        assert!(message.contains("password"), "message: {}", message);
        assert!(message.contains("invalid"), "message: {}", message);
    }

    #[test]
    fn successful_action_has_no_error_message() {
        let response: ActionResponse =
            serde_json::from_str(r#"{"result":"success","refresh":true,"errors":{}}"#).expect("parse action response");
        assert!(response.is_success());
        assert!(response.error_message().is_empty());
    }

    #[test]
    fn thermostat_form_carries_tab_and_form_fields() {
        let mut settings = ThermostatSettings::new();
        settings.insert(
            2,
            ThermostatSetting {
                heating_cooling: true,
                installed: true,
                heating_target_temperature: 21.5,
                name: "Kitchen".to_string(),
                ..ThermostatSetting::default()
            },
        );
        let form = thermostat_settings_form(3, &settings);

        let find = |key: &str| form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        assert_eq!(find("tab"), Some("3"));
        assert_eq!(find("form"), Some("thermos_data"));
        assert_eq!(find("heating@3_2"), Some("21.5"));
        assert_eq!(find("name@3_2"), Some("Kitchen"));
        assert_eq!(find("hc@3_2"), Some("on"));
        assert_eq!(find("installed@3_2"), Some("on"));
        // unchecked flags are omitted entirely
        assert_eq!(find("cef@3_2"), None);
    }
}

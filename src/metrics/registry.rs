//! Owned Prometheus instruments and their set/remove operations.
//!
//! The registry is an explicit value injected into every consumer; nothing
//! here touches the crate-global default registry. Series are created on
//! first set and retracted with the `remove_*` operations as rooms and
//! devices come and go.

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::time::{Duration, Instant};

const DEVICE_LABELS: &[&str] = &["device"];
const ROOM_LABELS: &[&str] = &["device", "id", "room"];
const HTTP_LABELS: &[&str] = &["device", "operation", "status"];

pub struct Metrics {
    registry: Registry,
    connected: GaugeVec,
    water_temperature: GaugeVec,
    external_temperature: GaugeVec,
    heating_mode: GaugeVec,
    eco_mode: GaugeVec,
    room_connected: GaugeVec,
    room_temperature: GaugeVec,
    room_dew_temperature: GaugeVec,
    room_target_temperature: GaugeVec,
    room_humidity: GaugeVec,
    room_relay: GaugeVec,
    http_client: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connected = GaugeVec::new(
            Opts::new("thermo_controller_connected", "Controller session is active"),
            DEVICE_LABELS,
        )?;
        registry.register(Box::new(connected.clone()))?;
        let water_temperature = GaugeVec::new(
            Opts::new("thermo_water_temperature", "Water temperature in celsius"),
            DEVICE_LABELS,
        )?;
        registry.register(Box::new(water_temperature.clone()))?;
        let external_temperature = GaugeVec::new(
            Opts::new("thermo_external_temperature", "External temperature in celsius"),
            DEVICE_LABELS,
        )?;
        registry.register(Box::new(external_temperature.clone()))?;
        let heating_mode = GaugeVec::new(
            Opts::new("thermo_heating_mode", "1 while the controller is in heating mode, 0 in cooling mode"),
            DEVICE_LABELS,
        )?;
        registry.register(Box::new(heating_mode.clone()))?;
        let eco_mode = GaugeVec::new(
            Opts::new("thermo_eco_mode", "1 while the controller is in eco mode, 0 in comfort mode"),
            DEVICE_LABELS,
        )?;
        registry.register(Box::new(eco_mode.clone()))?;

        let room_connected = GaugeVec::new(
            Opts::new("thermo_room_connected", "Room thermostat is reporting"),
            ROOM_LABELS,
        )?;
        registry.register(Box::new(room_connected.clone()))?;
        let room_temperature = GaugeVec::new(
            Opts::new("thermo_room_temperature", "Room temperature in celsius"),
            ROOM_LABELS,
        )?;
        registry.register(Box::new(room_temperature.clone()))?;
        let room_dew_temperature = GaugeVec::new(
            Opts::new("thermo_dew_temperature", "Room dew point temperature in celsius"),
            ROOM_LABELS,
        )?;
        registry.register(Box::new(room_dew_temperature.clone()))?;
        let room_target_temperature = GaugeVec::new(
            Opts::new("thermo_target_temperature", "Room target temperature in celsius"),
            ROOM_LABELS,
        )?;
        registry.register(Box::new(room_target_temperature.clone()))?;
        let room_humidity = GaugeVec::new(
            Opts::new("thermo_humidity", "Room relative humidity in percent"),
            ROOM_LABELS,
        )?;
        registry.register(Box::new(room_humidity.clone()))?;
        let room_relay = GaugeVec::new(Opts::new("thermo_relay_on", "Room relay state"), ROOM_LABELS)?;
        registry.register(Box::new(room_relay.clone()))?;

        let http_client = HistogramVec::new(
            HistogramOpts::new("thermo_http_client_seconds", "Controller HTTP request durations"),
            HTTP_LABELS,
        )?;
        registry.register(Box::new(http_client.clone()))?;

        registry.register(Box::new(UptimeCollector::new()?))?;

        Ok(Metrics {
            registry,
            connected,
            water_temperature,
            external_temperature,
            heating_mode,
            eco_mode,
            room_connected,
            room_temperature,
            room_dew_temperature,
            room_target_temperature,
            room_humidity,
            room_relay,
            http_client,
        })
    }

    pub fn connected(&self, device: &str, connected: bool) {
        self.connected.with_label_values(&[device]).set(bool_value(connected));
    }

    pub fn water_temperature(&self, device: &str, celsius: f64) {
        self.water_temperature.with_label_values(&[device]).set(celsius);
    }

    pub fn external_temperature(&self, device: &str, celsius: f64) {
        self.external_temperature.with_label_values(&[device]).set(celsius);
    }

    pub fn heating_mode(&self, device: &str, heating: bool) {
        self.heating_mode.with_label_values(&[device]).set(bool_value(heating));
    }

    pub fn eco_mode(&self, device: &str, eco: bool) {
        self.eco_mode.with_label_values(&[device]).set(bool_value(eco));
    }

    pub fn room_connected(&self, device: &str, id: &str, room: &str, connected: bool) {
        self.room_connected
            .with_label_values(&[device, id, room])
            .set(bool_value(connected));
    }

    pub fn room_temperature(&self, device: &str, id: &str, room: &str, celsius: f64) {
        self.room_temperature.with_label_values(&[device, id, room]).set(celsius);
    }

    pub fn room_dew_temperature(&self, device: &str, id: &str, room: &str, celsius: f64) {
        self.room_dew_temperature
            .with_label_values(&[device, id, room])
            .set(celsius);
    }

    pub fn room_target_temperature(&self, device: &str, id: &str, room: &str, celsius: f64) {
        self.room_target_temperature
            .with_label_values(&[device, id, room])
            .set(celsius);
    }

    pub fn room_humidity(&self, device: &str, id: &str, room: &str, percent: f64) {
        self.room_humidity.with_label_values(&[device, id, room]).set(percent);
    }

    pub fn room_relay(&self, device: &str, id: &str, room: &str, on: bool) {
        self.room_relay.with_label_values(&[device, id, room]).set(bool_value(on));
    }

    /// Retracts every room-level series for one room, the connected
    /// indicator included. Absent series are a no-op.
    pub fn remove_room(&self, device: &str, id: &str, room: &str) {
        let labels = &[device, id, room];
        let _ = self.room_connected.remove_label_values(labels);
        let _ = self.room_temperature.remove_label_values(labels);
        let _ = self.room_dew_temperature.remove_label_values(labels);
        let _ = self.room_target_temperature.remove_label_values(labels);
        let _ = self.room_humidity.remove_label_values(labels);
        let _ = self.room_relay.remove_label_values(labels);
    }

    /// Retracts every device-level series. Absent series are a no-op.
    pub fn remove_device(&self, device: &str) {
        let labels = &[device];
        let _ = self.connected.remove_label_values(labels);
        let _ = self.water_temperature.remove_label_values(labels);
        let _ = self.external_temperature.remove_label_values(labels);
        let _ = self.heating_mode.remove_label_values(labels);
        let _ = self.eco_mode.remove_label_values(labels);
    }

    pub fn observe_http(&self, device: &str, operation: &str, status: u16, duration: Duration) {
        self.http_client
            .with_label_values(&[device, operation, &status.to_string()])
            .observe(duration.as_secs_f64());
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Renders the current series in the Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

fn bool_value(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// Seconds since process start, computed at scrape time.
struct UptimeCollector {
    gauge: Gauge,
    started: Instant,
}

impl UptimeCollector {
    fn new() -> Result<Self, prometheus::Error> {
        Ok(UptimeCollector {
            gauge: Gauge::with_opts(Opts::new("thermo_uptime_seconds", "Seconds since the exporter started"))?,
            started: Instant::now(),
        })
    }
}

impl Collector for UptimeCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.gauge.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.gauge.set(self.started.elapsed().as_secs_f64());
        self.gauge.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge_value(metrics: &Metrics, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        for family in metrics.gather() {
            if family.get_name() != name {
                continue;
            }
            for metric in family.get_metric() {
                let matches = labels.iter().all(|(key, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *key && pair.get_value() == *value)
                });
                if matches && metric.get_label().len() == labels.len() {
                    return Some(metric.get_gauge().get_value());
                }
            }
        }
        None
    }

    #[test]
    fn set_creates_and_overwrites_series() {
        let metrics = Metrics::new().expect("registry");
        metrics.room_temperature("D1", "1", "Kitchen", 21.5);
        assert_eq!(
            gauge_value(&metrics, "thermo_room_temperature", &[("device", "D1"), ("id", "1"), ("room", "Kitchen")]),
            Some(21.5)
        );

        metrics.room_temperature("D1", "1", "Kitchen", 22.0);
        assert_eq!(
            gauge_value(&metrics, "thermo_room_temperature", &[("device", "D1"), ("id", "1"), ("room", "Kitchen")]),
            Some(22.0)
        );
    }

    #[test]
    fn remove_room_retracts_all_room_series() {
        let metrics = Metrics::new().expect("registry");
        metrics.room_connected("D1", "1", "Kitchen", true);
        metrics.room_temperature("D1", "1", "Kitchen", 21.5);
        metrics.room_humidity("D1", "1", "Kitchen", 45.0);

        metrics.remove_room("D1", "1", "Kitchen");
        let labels = &[("device", "D1"), ("id", "1"), ("room", "Kitchen")];
        assert_eq!(gauge_value(&metrics, "thermo_room_connected", labels), None);
        assert_eq!(gauge_value(&metrics, "thermo_room_temperature", labels), None);
        assert_eq!(gauge_value(&metrics, "thermo_humidity", labels), None);
    }

    #[test]
    fn removals_of_absent_series_are_noops() {
        let metrics = Metrics::new().expect("registry");
        metrics.remove_room("D1", "1", "Kitchen");
        metrics.remove_device("D1");
    }

    #[test]
    fn remove_device_keeps_other_devices_intact() {
        let metrics = Metrics::new().expect("registry");
        metrics.connected("D1", true);
        metrics.water_temperature("D1", 38.0);
        metrics.connected("D2", true);

        metrics.remove_device("D1");
        assert_eq!(gauge_value(&metrics, "thermo_controller_connected", &[("device", "D1")]), None);
        assert_eq!(gauge_value(&metrics, "thermo_water_temperature", &[("device", "D1")]), None);
        assert_eq!(gauge_value(&metrics, "thermo_controller_connected", &[("device", "D2")]), Some(1.0));
    }

    #[test]
    fn http_observations_accumulate_per_outcome() {
        let metrics = Metrics::new().expect("registry");
        metrics.observe_http("D1", "login", 200, Duration::from_millis(120));
        metrics.observe_http("D1", "login", 200, Duration::from_millis(80));
        metrics.observe_http("D1", "login", 0, Duration::from_secs(1));

        let family = metrics
            .gather()
            .into_iter()
            .find(|family| family.get_name() == "thermo_http_client_seconds")
            .expect("histogram family");
        let ok_series = family
            .get_metric()
            .iter()
            .find(|metric| metric.get_label().iter().any(|pair| pair.get_value() == "200"))
            .expect("status 200 series");
        assert_eq!(ok_series.get_histogram().get_sample_count(), 2);
    }

    #[test]
    fn encode_renders_text_format() {
        let metrics = Metrics::new().expect("registry");
        metrics.external_temperature("D1", 4.5);
        let body = String::from_utf8(metrics.encode().expect("encode")).expect("utf8");
        assert!(body.contains("thermo_external_temperature{device=\"D1\"} 4.5"));
        assert!(body.contains("thermo_uptime_seconds"));
    }
}

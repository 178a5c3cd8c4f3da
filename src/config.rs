use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::countdown::DEFAULT_OFFER_COUNTDOWN_SECS;
use crate::error::{config_error, Error};
use crate::geofence::ARRIVAL_RADIUS_METERS;
use crate::telemetry::DEFAULT_BUFFER_CAP;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_base: String,
    pub ws_url: String,
    pub token: String,
    pub driver_id: Option<String>,
    pub offer_countdown_secs: u32,
    pub location_interval: Duration,
    pub location_min_distance_meters: f64,
    pub telemetry_buffer_cap: usize,
    pub arrival_radius_meters: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        dotenv::dotenv().ok();

        Ok(Self {
            api_base: env::var("DRIVER_API_BASE")?,
            ws_url: env::var("DRIVER_WS_URL")?,
            token: env::var("DRIVER_TOKEN")?,
            driver_id: env::var("DRIVER_ID").ok().filter(|id| !id.is_empty()),
            offer_countdown_secs: parse_or("OFFER_COUNTDOWN_SECS", DEFAULT_OFFER_COUNTDOWN_SECS)?,
            location_interval: Duration::from_secs(parse_or("LOCATION_INTERVAL_SECS", 5)?),
            location_min_distance_meters: parse_or("LOCATION_MIN_DISTANCE_METERS", 10.0)?,
            telemetry_buffer_cap: parse_or("TELEMETRY_BUFFER_CAP", DEFAULT_BUFFER_CAP)?,
            arrival_radius_meters: parse_or("ARRIVAL_RADIUS_METERS", ARRIVAL_RADIUS_METERS)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8000/api".into(),
            ws_url: "ws://127.0.0.1:8000/ws/driver/me".into(),
            token: String::new(),
            driver_id: None,
            offer_countdown_secs: DEFAULT_OFFER_COUNTDOWN_SECS,
            location_interval: Duration::from_secs(5),
            location_min_distance_meters: 10.0,
            telemetry_buffer_cap: DEFAULT_BUFFER_CAP,
            arrival_radius_meters: ARRIVAL_RADIUS_METERS,
        }
    }
}

fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T, Error> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| config_error(name)),
        Err(_) => Ok(default),
    }
}

#[test]
fn defaults_match_documented_values() {
    let config = Config::default();

    assert_eq!(config.offer_countdown_secs, 15);
    assert_eq!(config.location_interval, Duration::from_secs(5));
    assert_eq!(config.location_min_distance_meters, 10.0);
    assert_eq!(config.telemetry_buffer_cap, 500);
    assert_eq!(config.arrival_radius_meters, 100.0);
}

#[test]
fn unparsable_value_is_an_error() {
    env::set_var("CABALLUS_TEST_BAD_NUMBER", "fifteen");

    let result: Result<u32, Error> = parse_or("CABALLUS_TEST_BAD_NUMBER", 15);

    assert_eq!(result.unwrap_err().code, 1);
    assert_eq!(parse_or("CABALLUS_TEST_UNSET_NUMBER", 7u32).unwrap(), 7);
}

//! Raw weather record schema.
//!
//! One `CityWeather` per input key ("City, Country"). Deserializing into these
//! types is the extract step's validation; re-serializing normalizes the
//! record (field order, numeric types) for the downstream steps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub text: String,
    pub code: i64,
}

/// Daily forecast metrics, metric and imperial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayWeather {
    pub maxtemp_c: f64,
    pub maxtemp_f: f64,
    pub mintemp_c: f64,
    pub mintemp_f: f64,
    pub avgtemp_c: f64,
    pub avgtemp_f: f64,
    pub maxwind_mph: f64,
    pub maxwind_kph: f64,
    pub totalprecip_mm: f64,
    pub totalprecip_in: f64,
    pub totalsnow_cm: f64,
    pub avgvis_km: f64,
    pub avgvis_miles: f64,
    pub avghumidity: i64,
    /// 0/1 indicator
    pub daily_will_it_rain: i64,
    /// Percent
    pub daily_chance_of_rain: i64,
    /// 0/1 indicator
    pub daily_will_it_snow: i64,
    /// Percent
    pub daily_chance_of_snow: i64,
    pub condition: Condition,
    pub uv: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    /// YYYY-MM-DD
    pub date: String,
    pub date_epoch: i64,
    pub day: DayWeather,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub region: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub tz_id: String,
    pub localtime_epoch: i64,
    pub localtime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub last_updated: String,
    /// Some providers omit the Celsius reading
    pub temp_c: Option<f64>,
    pub temp_f: f64,
    /// 1 for daytime, 0 for night
    pub is_day: i64,
    pub condition: Condition,
}

/// Complete record for one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityWeather {
    pub location: Location,
    pub current: CurrentWeather,
    /// Keyed by section name; the provider uses "forecastday"
    pub forecast: BTreeMap<String, Vec<ForecastDay>>,
}

impl CityWeather {
    /// Forecast days under the conventional "forecastday" key.
    pub fn forecast_days(&self) -> &[ForecastDay] {
        self.forecast
            .get("forecastday")
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

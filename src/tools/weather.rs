//! weather 工具：按地点查询当前天气
//!
//! 内置离线数据源：已知城市返回固定读数，其它地点按名称散列出稳定读数，保证同一输入结果一致。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WeatherArgs {
    /// 城市或地区名
    pub location: String,
    /// celsius（默认）或 fahrenheit
    #[serde(default)]
    pub unit: Option<TemperatureUnit>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct WeatherReport {
    pub location: String,
    pub temperature: f64,
    pub unit: TemperatureUnit,
    pub conditions: String,
}

const KNOWN: &[(&str, f64, &str)] = &[
    ("paris", 22.0, "sunny"),
    ("london", 16.0, "light rain"),
    ("tokyo", 27.0, "humid"),
    ("new york", 19.0, "cloudy"),
    ("beijing", 24.0, "clear"),
];

const CONDITIONS: &[&str] = &["sunny", "cloudy", "windy", "light rain", "clear"];

/// 天气工具
#[derive(Debug, Default)]
pub struct WeatherTool;

impl WeatherTool {
    pub fn lookup(location: &str, unit: TemperatureUnit) -> WeatherReport {
        let key = location.trim().to_lowercase();
        let (celsius, conditions) = KNOWN
            .iter()
            .find(|(name, _, _)| *name == key)
            .map(|(_, t, c)| (*t, c.to_string()))
            .unwrap_or_else(|| {
                let hash = key.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
                let temp = (hash % 35) as f64;
                (temp, CONDITIONS[(hash as usize) % CONDITIONS.len()].to_string())
            });
        let temperature = match unit {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        };
        WeatherReport {
            location: location.trim().to_string(),
            temperature,
            unit,
            conditions,
        }
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Look up the current weather for a location. Args: location (string), unit (celsius|fahrenheit, optional)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(WeatherArgs)).unwrap_or_default()
    }

    fn output_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(WeatherReport)).unwrap_or_default()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: WeatherArgs =
            serde_json::from_value(args).map_err(|e| format!("weather: invalid args: {e}"))?;
        if args.location.trim().is_empty() {
            return Err("weather: 'location' is required".to_string());
        }
        let report = Self::lookup(&args.location, args.unit.unwrap_or_default());
        serde_json::to_value(report).map_err(|e| e.to_string())
    }
}

//! 天气工具：城市 → 坐标 → 当前天气
//!
//! 两步：Open-Meteo geocoding 端点按城市名取经纬度（免密钥），再调 forecast 端点
//! 取 temperature_2m 与 wind_speed_10m。城市找不到或请求失败都以 Err 返回，
//! 由编排层写回为 tool 失败消息。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::tools::Tool;

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// get_weather 工具：持有带超时的 reqwest Client
pub struct WeatherTool {
    client: Client,
}

impl WeatherTool {
    pub fn new(timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// 城市名 → (纬度, 经度)；找不到返回 Err
    async fn geocode(&self, city: &str) -> Result<(f64, f64), String> {
        let resp = self
            .client
            .get(GEOCODING_URL)
            .query(&[("name", city), ("count", "1")])
            .send()
            .await
            .map_err(|e| format!("Geocoding request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("Geocoding HTTP {}", resp.status()));
        }
        let data: Value = resp
            .json()
            .await
            .map_err(|e| format!("Geocoding body: {}", e))?;
        let first = data
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|r| r.first())
            .ok_or_else(|| format!("Ville '{}' introuvable", city))?;
        let lat = first.get("latitude").and_then(|v| v.as_f64());
        let lon = first.get("longitude").and_then(|v| v.as_f64());
        match (lat, lon) {
            (Some(lat), Some(lon)) => Ok((lat, lon)),
            _ => Err(format!("Ville '{}' introuvable", city)),
        }
    }

    async fn current_weather(&self, city: &str) -> Result<String, String> {
        let (lat, lon) = self.geocode(city).await?;
        let resp = self
            .client
            .get(FORECAST_URL)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("current", "temperature_2m,wind_speed_10m".to_string()),
            ])
            .send()
            .await
            .map_err(|e| format!("Forecast request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("Forecast HTTP {}", resp.status()));
        }
        let data: Value = resp
            .json()
            .await
            .map_err(|e| format!("Forecast body: {}", e))?;
        let current = data.get("current").cloned().unwrap_or(Value::Null);

        let payload = serde_json::json!({
            "city": city,
            "latitude": lat,
            "longitude": lon,
            "current": current,
        });
        Ok(payload.to_string())
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Current weather for a city (temperature, wind; coordinates resolved internally). Args: {\"city\": \"Vaasa\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "City name, e.g. Vaasa" }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let city = args
            .get("city")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if city.is_empty() {
            return Err("Missing city".to_string());
        }
        tracing::info!(city = %city, "weather lookup");
        self.current_weather(city).await
    }
}

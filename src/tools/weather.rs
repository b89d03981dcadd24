use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::tools::ToolError;

#[derive(Debug, Deserialize)]
pub struct WeatherArgs {
    pub latitude: f64,
    pub longitude: f64,
}

/// Read-through to the forecast API. Errors are returned to the agent as-is;
/// nothing here retries.
pub async fn get_weather(client: &Client, api_base: &str, args: WeatherArgs) -> Result<Value, ToolError> {
    info!("Fetching forecast for {},{}", args.latitude, args.longitude);

    let forecast = client
        .get(api_base)
        .query(&[
            ("latitude", args.latitude.to_string()),
            ("longitude", args.longitude.to_string()),
            ("current", "temperature_2m".to_string()),
            ("hourly", "temperature_2m".to_string()),
            ("daily", "sunrise,sunset".to_string()),
            ("timezone", "auto".to_string()),
        ])
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await?;

    Ok(forecast)
}

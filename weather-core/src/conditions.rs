//! Normalized weather condition vocabulary and per-provider code tables.

use crate::provider::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardCondition {
    Clear,
    PartlyCloudy,
    Cloudy,
    Overcast,
    Fog,
    Mist,
    LightRain,
    ModerateRain,
    HeavyRain,
    Drizzle,
    LightSnow,
    ModerateSnow,
    HeavySnow,
    Thunderstorm,
    ThunderstormWithRain,
    ThunderstormWithHail,
    RainShowers,
    SnowShowers,
    Sleet,
    FreezingRain,
    Blizzard,
    Sandstorm,
    Unknown,
}

impl StandardCondition {
    pub fn description(&self) -> &'static str {
        use StandardCondition::*;
        match self {
            Clear => "Clear Sky",
            PartlyCloudy => "Partly Cloudy",
            Cloudy => "Cloudy",
            Overcast => "Overcast",
            Fog => "Fog",
            Mist => "Mist",
            LightRain => "Light Rain",
            ModerateRain => "Moderate Rain",
            HeavyRain => "Heavy Rain",
            Drizzle => "Drizzle",
            LightSnow => "Light Snow",
            ModerateSnow => "Moderate Snow",
            HeavySnow => "Heavy Snow",
            Thunderstorm => "Thunderstorm",
            ThunderstormWithRain => "Thunderstorm with Rain",
            ThunderstormWithHail => "Thunderstorm with Hail",
            RainShowers => "Rain Showers",
            SnowShowers => "Snow Showers",
            Sleet => "Sleet",
            FreezingRain => "Freezing Rain",
            Blizzard => "Blizzard",
            Sandstorm => "Sandstorm",
            Unknown => "Unknown",
        }
    }
}

/// Map a provider's raw condition code onto the shared vocabulary.
pub fn standardize(provider: ProviderId, code: i64) -> Option<StandardCondition> {
    match provider {
        ProviderId::OpenWeather => openweather(code),
        ProviderId::WeatherApi => weatherapi(code),
        ProviderId::OpenMeteo => openmeteo(code),
    }
}

/// Normalized description for `code`, or `fallback` (the provider's own text)
/// when the code is missing or unmapped.
pub fn describe(provider: ProviderId, code: Option<i64>, fallback: Option<&str>) -> Option<String> {
    match code.and_then(|c| standardize(provider, c)) {
        Some(condition) => Some(condition.description().to_string()),
        None => fallback.map(str::to_string),
    }
}

// https://openweathermap.org/weather-conditions
fn openweather(code: i64) -> Option<StandardCondition> {
    use StandardCondition::*;
    let condition = match code {
        200..=202 | 230..=232 => ThunderstormWithRain,
        210..=212 | 221 => Thunderstorm,
        300..=302 | 310..=312 => Drizzle,
        313 | 314 | 321 => RainShowers,
        500 => LightRain,
        501 => ModerateRain,
        502..=504 => HeavyRain,
        511 => FreezingRain,
        520..=522 | 531 => RainShowers,
        600 | 615 => LightSnow,
        601 | 616 => ModerateSnow,
        602 => HeavySnow,
        611..=613 => Sleet,
        620 | 621 => SnowShowers,
        622 => Blizzard,
        701 => Mist,
        711 | 721 | 741 => Fog,
        731 | 751 | 761 | 762 => Sandstorm,
        771 => RainShowers,
        781 => Thunderstorm,
        800 => Clear,
        801 | 802 => PartlyCloudy,
        803 => Cloudy,
        804 => Overcast,
        _ => return None,
    };
    Some(condition)
}

// https://www.weatherapi.com/docs/weather_conditions.json
fn weatherapi(code: i64) -> Option<StandardCondition> {
    use StandardCondition::*;
    let condition = match code {
        1000 => Clear,
        1003 => PartlyCloudy,
        1006 => Cloudy,
        1009 => Overcast,
        1030 => Mist,
        1063 | 1180 | 1183 => LightRain,
        1066 | 1210 | 1213 => LightSnow,
        1069 | 1204 | 1207 | 1237 | 1249 | 1252 | 1261 | 1264 => Sleet,
        1072 | 1168 | 1171 | 1198 | 1201 => FreezingRain,
        1087 => Thunderstorm,
        1114 | 1117 => Blizzard,
        1135 | 1147 => Fog,
        1150 | 1153 => Drizzle,
        1186 | 1189 => ModerateRain,
        1192 | 1195 => HeavyRain,
        1216 | 1219 => ModerateSnow,
        1222 | 1225 => HeavySnow,
        1240 | 1243 | 1246 => RainShowers,
        1255 | 1258 => SnowShowers,
        1273 | 1276 | 1279 | 1282 => ThunderstormWithRain,
        _ => return None,
    };
    Some(condition)
}

// WMO weather interpretation codes, https://open-meteo.com/en/docs
fn openmeteo(code: i64) -> Option<StandardCondition> {
    use StandardCondition::*;
    let condition = match code {
        0 => Clear,
        1 | 2 => PartlyCloudy,
        3 => Overcast,
        45 | 48 => Fog,
        51 | 53 | 55 => Drizzle,
        56 | 57 | 66 | 67 => FreezingRain,
        61 => LightRain,
        63 => ModerateRain,
        65 => HeavyRain,
        71 | 77 => LightSnow,
        73 => ModerateSnow,
        75 => HeavySnow,
        80..=82 => RainShowers,
        85 | 86 => SnowShowers,
        95 => Thunderstorm,
        96 | 99 => ThunderstormWithHail,
        _ => return None,
    };
    Some(condition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_sky_agrees_across_providers() {
        for (provider, code) in [
            (ProviderId::OpenWeather, 800),
            (ProviderId::WeatherApi, 1000),
            (ProviderId::OpenMeteo, 0),
        ] {
            assert_eq!(standardize(provider, code), Some(StandardCondition::Clear));
        }
        assert_eq!(StandardCondition::Clear.description(), "Clear Sky");
    }

    #[test]
    fn representative_codes() {
        assert_eq!(standardize(ProviderId::OpenWeather, 231), Some(StandardCondition::ThunderstormWithRain));
        assert_eq!(standardize(ProviderId::OpenWeather, 762), Some(StandardCondition::Sandstorm));
        assert_eq!(standardize(ProviderId::WeatherApi, 1117), Some(StandardCondition::Blizzard));
        assert_eq!(standardize(ProviderId::WeatherApi, 1282), Some(StandardCondition::ThunderstormWithRain));
        assert_eq!(standardize(ProviderId::OpenMeteo, 99), Some(StandardCondition::ThunderstormWithHail));
        assert_eq!(standardize(ProviderId::OpenMeteo, 3), Some(StandardCondition::Overcast));
    }

    #[test]
    fn unmapped_codes_fall_back_to_provider_text() {
        assert_eq!(standardize(ProviderId::OpenWeather, 999), None);
        assert_eq!(
            describe(ProviderId::OpenWeather, Some(999), Some("odd sky")).as_deref(),
            Some("odd sky")
        );
        assert_eq!(describe(ProviderId::WeatherApi, None, None), None);
        assert_eq!(
            describe(ProviderId::WeatherApi, Some(1009), Some("Overcast clouds")).as_deref(),
            Some("Overcast")
        );
    }
}

use serde::Serialize;

use super::Aggregates;

/// Which ways power is currently flowing, each judged against a tolerance in watts.
///
/// Positive site/battery means exporting, negative means importing.
/// Load only imports and solar only exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerRoutes {
    pub solar_to_site: bool,
    pub site_to_load: bool,
    pub solar_to_load: bool,
    pub battery_to_load: bool,
    pub solar_to_battery: bool,
}

impl PowerRoutes {
    pub fn from_aggregates(agg: &Aggregates, eps: f64) -> Self {
        let Aggregates {
            site,
            battery,
            load,
            solar,
        } = *agg;

        Self {
            solar_to_site: site < -eps,
            site_to_load: site > eps,
            solar_to_load: (load - solar - battery) < (site + eps) && solar > eps,
            battery_to_load: battery > eps,
            solar_to_battery: battery < -eps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 50.0;

    fn agg(site: f64, battery: f64, load: f64, solar: f64) -> Aggregates {
        Aggregates {
            site,
            battery,
            load,
            solar,
        }
    }

    #[test]
    fn test_idle() {
        let routes = PowerRoutes::from_aggregates(&agg(10.0, -20.0, 0.0, 30.0), EPS);
        assert_eq!(routes, PowerRoutes::default());
    }

    #[test]
    fn test_solar_exporting_and_charging() {
        // 3kW of solar: 1kW to the house, 1.5kW to the battery, 500W to the grid
        let routes = PowerRoutes::from_aggregates(&agg(-500.0, -1500.0, 1000.0, 3000.0), EPS);
        assert!(routes.solar_to_site);
        assert!(routes.solar_to_battery);
        assert!(routes.solar_to_load);
        assert!(!routes.site_to_load);
        assert!(!routes.battery_to_load);
    }

    #[test]
    fn test_night() {
        let routes = PowerRoutes::from_aggregates(&agg(200.0, 800.0, 1000.0, 0.0), EPS);
        assert!(routes.site_to_load);
        assert!(routes.battery_to_load);
        assert!(!routes.solar_to_load);
        assert!(!routes.solar_to_site);
    }

    #[test]
    fn test_json_names() {
        let json = serde_json::to_value(PowerRoutes {
            solar_to_site: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["solarToSite"], true);
        assert_eq!(json["batteryToLoad"], false);
    }
}

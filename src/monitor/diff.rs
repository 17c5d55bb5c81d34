// src/monitor/diff.rs — Field-level change detection between snapshots

use crate::infra::config::DeviceSuffixes;
use crate::portal::EnergyFlowSnapshot;

/// Which downstream device a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceGroup {
    Panels,
    Battery,
    Grid,
    House,
}

impl DeviceGroup {
    pub const ALL: [DeviceGroup; 4] = [
        DeviceGroup::Panels,
        DeviceGroup::Battery,
        DeviceGroup::Grid,
        DeviceGroup::House,
    ];

    pub fn suffix<'a>(&self, suffixes: &'a DeviceSuffixes) -> &'a str {
        match self {
            DeviceGroup::Panels => &suffixes.panels,
            DeviceGroup::Battery => &suffixes.battery,
            DeviceGroup::Grid => &suffixes.grid,
            DeviceGroup::House => &suffixes.house,
        }
    }

    /// Downstream device id: station id followed by the group suffix.
    pub fn device_id(&self, station_id: &str, suffixes: &DeviceSuffixes) -> String {
        format!("{station_id}{}", self.suffix(suffixes))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeviceGroup::Panels => "panels",
            DeviceGroup::Battery => "battery",
            DeviceGroup::Grid => "grid",
            DeviceGroup::House => "house",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DeviceGroup::Panels => "Solar panels",
            DeviceGroup::Battery => "Battery",
            DeviceGroup::Grid => "Grid connection",
            DeviceGroup::House => "House",
        }
    }

    /// Fields reported under this group, in dispatch order.
    pub fn fields(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| f.group() == *self)
            .collect()
    }
}

/// One measured quantity of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    SolarGeneration,
    BatteryFlow,
    BatteryChargeLevel,
    GridFlow,
    HouseConsumption,
}

impl Field {
    /// Fixed order in which changes are reported.
    pub const ALL: [Field; 5] = [
        Field::SolarGeneration,
        Field::BatteryFlow,
        Field::BatteryChargeLevel,
        Field::GridFlow,
        Field::HouseConsumption,
    ];

    pub fn property(&self) -> &'static str {
        match self {
            Field::SolarGeneration => "solarGenerationKw",
            Field::BatteryFlow => "batteryFlowKw",
            Field::BatteryChargeLevel => "batteryChargeLevelPct",
            Field::GridFlow => "gridFlowKw",
            Field::HouseConsumption => "houseConsumptionKw",
        }
    }

    pub fn value(&self, snapshot: &EnergyFlowSnapshot) -> f64 {
        match self {
            Field::SolarGeneration => snapshot.solar_generation_kw,
            Field::BatteryFlow => snapshot.battery_flow_kw,
            Field::BatteryChargeLevel => snapshot.battery_charge_level_pct,
            Field::GridFlow => snapshot.grid_flow_kw,
            Field::HouseConsumption => snapshot.house_consumption_kw,
        }
    }

    pub fn group(&self) -> DeviceGroup {
        match self {
            Field::SolarGeneration => DeviceGroup::Panels,
            Field::BatteryFlow | Field::BatteryChargeLevel => DeviceGroup::Battery,
            Field::GridFlow => DeviceGroup::Grid,
            Field::HouseConsumption => DeviceGroup::House,
        }
    }
}

/// Fields whose value differs between two snapshots. Exact comparison.
#[allow(clippy::float_cmp)]
pub fn diff(previous: &EnergyFlowSnapshot, current: &EnergyFlowSnapshot) -> Vec<Field> {
    Field::ALL
        .into_iter()
        .filter(|f| f.value(previous) != f.value(current))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> EnergyFlowSnapshot {
        EnergyFlowSnapshot {
            grid_flow_kw: -0.8,
            battery_flow_kw: -1.5,
            battery_charge_level_pct: 87.0,
            house_consumption_kw: 0.9,
            solar_generation_kw: 3.2,
        }
    }

    #[test]
    fn test_equal_snapshots_no_changes() {
        assert!(diff(&sample(), &sample()).is_empty());
        assert!(diff(&EnergyFlowSnapshot::default(), &EnergyFlowSnapshot::default()).is_empty());
    }

    #[test]
    fn test_single_field_change() {
        for field in Field::ALL {
            let mut changed = sample();
            match field {
                Field::SolarGeneration => changed.solar_generation_kw += 0.1,
                Field::BatteryFlow => changed.battery_flow_kw += 0.1,
                Field::BatteryChargeLevel => changed.battery_charge_level_pct += 1.0,
                Field::GridFlow => changed.grid_flow_kw += 0.1,
                Field::HouseConsumption => changed.house_consumption_kw += 0.1,
            }
            assert_eq!(diff(&sample(), &changed), vec![field]);
        }
    }

    #[test]
    fn test_changes_in_fixed_order() {
        let current = EnergyFlowSnapshot {
            house_consumption_kw: 2.0,
            grid_flow_kw: 1.0,
            solar_generation_kw: 0.0,
            ..sample()
        };
        assert_eq!(
            diff(&sample(), &current),
            vec![Field::SolarGeneration, Field::GridFlow, Field::HouseConsumption]
        );
    }

    #[test]
    fn test_no_epsilon() {
        let current = EnergyFlowSnapshot {
            grid_flow_kw: -0.8 + 1e-12,
            ..sample()
        };
        assert_eq!(diff(&sample(), &current), vec![Field::GridFlow]);
    }

    #[test]
    fn test_properties_match_snapshot_json() {
        let json = serde_json::to_value(sample()).unwrap();
        for field in Field::ALL {
            assert_eq!(json[field.property()], field.value(&sample()), "{field:?}");
        }
    }

    #[test]
    fn test_groups_and_device_ids() {
        let suffixes = DeviceSuffixes::default();
        assert_eq!(DeviceGroup::Battery.fields(), vec![Field::BatteryFlow, Field::BatteryChargeLevel]);
        assert_eq!(DeviceGroup::Panels.device_id("NE=1", &suffixes), "NE=1_panels");
        assert_eq!(Field::GridFlow.group().device_id("NE=1", &suffixes), "NE=1_grid");
        assert_eq!(Field::HouseConsumption.group().device_id("NE=1", &suffixes), "NE=1_house");
    }
}

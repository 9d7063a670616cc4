// Device acquisition
//
// Adapters are inspected in descending performance preference; software
// adapters are skipped. The device is created at the newest feature level
// the adapter accepts, walking a fixed ladder.

use crate::backend::{Adapter, AdapterInfo, Backend, BackendError, Factory, FeatureLevel};
use crate::error::{RenderError, RenderResult};

/// Feature levels tried by `create_device`, newest first
pub const FEATURE_LEVEL_LADDER: [FeatureLevel; 3] = [
    FeatureLevel::Level12_2,
    FeatureLevel::Level12_1,
    FeatureLevel::Level12_0,
];

/// First hardware adapter in performance-preference order
pub fn acquire_adapter<B: Backend>(factory: &B::Factory) -> RenderResult<(B::Adapter, AdapterInfo)> {
    let mut index = 0;

    while let Some(adapter) = factory
        .enum_adapter_by_preference(index)
        .map_err(RenderError::startup("adapter enumeration"))?
    {
        index += 1;

        let info = adapter.info().map_err(RenderError::startup("adapter description"))?;
        if info.software {
            log::debug!("Skipping software adapter: {}", info.description);
            continue;
        }

        log::info!(
            "Use Adapter: {} ({} MiB dedicated)",
            info.description,
            info.dedicated_video_memory >> 20
        );
        return Ok((adapter, info));
    }

    Err(RenderError::NoSuitableAdapter { inspected: index })
}

/// Create the device at the first accepted level of `ladder`
pub fn create_device<B: Backend>(
    adapter: &B::Adapter,
    ladder: &[FeatureLevel],
) -> RenderResult<(B::Device, FeatureLevel)> {
    for &level in ladder {
        match adapter.create_device(level) {
            Ok(device) => {
                log::info!("FeatureLevel : {}", level);
                return Ok((device, level));
            }
            Err(BackendError::FeatureLevelUnsupported(_)) => {
                log::debug!("Feature level {} rejected, trying next", level);
            }
            Err(e) => return Err(RenderError::startup("device")(e)),
        }
    }

    let attempted = ladder.iter().map(FeatureLevel::to_string).collect::<Vec<_>>().join(", ");
    Err(RenderError::DeviceCreation { attempted })
}

/// The selected adapter and its device, alive for the whole run
pub struct GpuContext<B: Backend> {
    pub adapter: B::Adapter,
    pub adapter_info: AdapterInfo,
    pub device: B::Device,
    pub feature_level: FeatureLevel,
}

impl<B: Backend> GpuContext<B> {
    pub fn new(factory: &B::Factory) -> RenderResult<Self> {
        Self::with_ladder(factory, &FEATURE_LEVEL_LADDER)
    }

    pub fn with_ladder(factory: &B::Factory, ladder: &[FeatureLevel]) -> RenderResult<Self> {
        let (adapter, adapter_info) = acquire_adapter::<B>(factory)?;
        let (device, feature_level) = create_device::<B>(&adapter, ladder)?;

        Ok(Self { adapter, adapter_info, device, feature_level })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{AdapterSpec, HeadlessBackend, HeadlessConfig, HeadlessFactory};
    use rstest::rstest;

    fn factory(adapters: Vec<AdapterSpec>) -> HeadlessFactory {
        HeadlessFactory::new(HeadlessConfig { adapters, ..HeadlessConfig::default() })
    }

    #[test]
    fn software_adapters_are_skipped() {
        let factory = factory(vec![
            AdapterSpec::software("Microsoft Basic Render Driver"),
            AdapterSpec::hardware("Discrete GPU", FeatureLevel::Level12_2),
        ]);

        let (_, info) = acquire_adapter::<HeadlessBackend>(&factory).unwrap();
        assert_eq!(info.description, "Discrete GPU");
    }

    #[test]
    fn only_software_adapters_is_fatal() {
        let factory = factory(vec![AdapterSpec::software("WARP")]);

        let err = acquire_adapter::<HeadlessBackend>(&factory).err().unwrap();
        assert!(matches!(err, RenderError::NoSuitableAdapter { inspected: 1 }));
    }

    #[rstest]
    #[case(FeatureLevel::Level12_2, FeatureLevel::Level12_2)]
    #[case(FeatureLevel::Level12_1, FeatureLevel::Level12_1)]
    #[case(FeatureLevel::Level12_0, FeatureLevel::Level12_0)]
    fn ladder_picks_highest_supported(#[case] max: FeatureLevel, #[case] expected: FeatureLevel) {
        let factory = factory(vec![AdapterSpec::hardware("GPU", max)]);

        let context = GpuContext::<HeadlessBackend>::new(&factory).unwrap();
        assert_eq!(context.feature_level, expected);
    }

    #[test]
    fn adapter_below_ladder_is_fatal() {
        let factory = factory(vec![AdapterSpec::hardware("Old GPU", FeatureLevel::Level11_1)]);

        let err = GpuContext::<HeadlessBackend>::new(&factory).err().unwrap();
        match err {
            RenderError::DeviceCreation { attempted } => assert_eq!(attempted, "12.2, 12.1, 12.0"),
            other => panic!("unexpected error: {other}"),
        }
    }
}

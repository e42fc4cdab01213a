use crate::driver::{DeviceClass, DeviceId, DeviceInfo, Driver};
use crate::error::{OffloadError, Result};
use tracing::{debug, info, warn};

/// The one device a pipeline runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDevice {
    pub id: DeviceId,
    pub class: DeviceClass,
    pub info: DeviceInfo,
}

/// Pick the first GPU on the default platform, falling back to the first
/// CPU when no GPU is present or GPU enumeration fails.
pub fn select_device<D: Driver>(driver: &mut D) -> Result<SelectedDevice> {
    let (id, class) = match first_of(driver, DeviceClass::Gpu) {
        Some(id) => (id, DeviceClass::Gpu),
        None => {
            info!("no GPU device available, falling back to CPU");
            let id = first_of(driver, DeviceClass::Cpu).ok_or(OffloadError::NoDeviceAvailable)?;
            (id, DeviceClass::Cpu)
        }
    };

    let info = driver.device_info(id).unwrap_or_else(|code| {
        warn!(%code, "couldn't query device info");
        DeviceInfo::unknown()
    });
    info!(device = %info.name, %class, "selected compute device");
    Ok(SelectedDevice { id, class, info })
}

fn first_of<D: Driver>(driver: &mut D, class: DeviceClass) -> Option<DeviceId> {
    match driver.device_ids(class) {
        Ok(ids) => {
            debug!(%class, count = ids.len(), "enumerated devices");
            ids.first().copied()
        }
        Err(code) => {
            warn!(%class, %code, "device enumeration failed");
            None
        }
    }
}

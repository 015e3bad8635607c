//! Camera registry: the entry point the media framework talks to

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{error, info};

use crate::camera::{Camera, CameraInfo, VirtualCamera};
use crate::capture::RawFrameSource;
use crate::error::{Error, Result};
use crate::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    NotPresent,
    Present,
}

/// Module-level events, independent of any open device
pub trait ModuleCallbacks: Send + Sync {
    fn camera_device_status_change(&self, camera_id: u32, status: DeviceStatus);
}

pub struct CameraHal {
    cameras: Vec<Arc<Camera<VirtualCamera>>>,
    callbacks: ArcSwapOption<Box<dyn ModuleCallbacks>>,
}

impl CameraHal {
    /// Build `config.cameras` virtual cameras, all fed from `source`
    pub fn new(source: Arc<dyn RawFrameSource>, config: &Config) -> Result<Self> {
        let cameras = (0..config.cameras)
            .map(|id| {
                let device = VirtualCamera::new(id, source.clone(), config)?;
                Ok(Arc::new(Camera::new(id, device, &config.pipeline)))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(cameras = cameras.len(), "Camera HAL ready");
        Ok(Self {
            cameras,
            callbacks: ArcSwapOption::empty(),
        })
    }

    pub fn number_of_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn camera(&self, id: u32) -> Option<&Arc<Camera<VirtualCamera>>> {
        self.cameras.get(id as usize)
    }

    fn lookup(&self, id: i64) -> Result<&Arc<Camera<VirtualCamera>>> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.cameras.get(i))
            .ok_or_else(|| {
                error!(id, "Invalid camera id");
                Error::NoDevice(id.to_string())
            })
    }

    pub fn camera_info(&self, id: i64) -> Result<CameraInfo> {
        Ok(self.lookup(id)?.camera_info())
    }

    pub fn set_callbacks(&self, callbacks: Box<dyn ModuleCallbacks>) {
        self.callbacks.store(Some(Arc::new(callbacks)));
    }

    /// Open a camera by its decimal id
    pub fn open(&self, name: &str) -> Result<Arc<Camera<VirtualCamera>>> {
        info!(name, "Opening camera");
        if name.is_empty() {
            return Err(Error::invalid_argument("camera id name is empty"));
        }
        let id: i64 = name
            .parse()
            .map_err(|_| Error::invalid_argument(format!("invalid camera id name {:?}", name)))?;

        let camera = self.lookup(id)?;
        camera.open()?;
        Ok(camera.clone())
    }

    /// Record a hot-plug event: refresh the camera's static info and tell
    /// the module callbacks
    pub fn set_device_status(&self, id: u32, status: DeviceStatus) -> Result<()> {
        let camera = self.lookup(id as i64)?;
        if status == DeviceStatus::Present {
            camera.update_info();
        }
        if let Some(callbacks) = self.callbacks.load_full() {
            callbacks.camera_device_status_change(id, status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::EmptySource;
    use std::sync::Mutex;

    fn hal() -> CameraHal {
        CameraHal::new(Arc::new(EmptySource), &Config::default()).unwrap()
    }

    #[test]
    fn test_open_by_name() {
        let hal = hal();
        assert_eq!(hal.number_of_cameras(), 2);

        assert!(matches!(hal.open(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(hal.open("1x"), Err(Error::InvalidArgument(_))));
        assert!(matches!(hal.open("2"), Err(Error::NoDevice(_))));
        assert!(matches!(hal.open("-1"), Err(Error::NoDevice(_))));

        let camera = hal.open("1").unwrap();
        assert_eq!(camera.id(), 1);
        assert!(matches!(hal.open("1"), Err(Error::Busy(1))));
    }

    #[test]
    fn test_camera_info_range() {
        let hal = hal();
        assert!(hal.camera_info(0).is_ok());
        assert!(matches!(hal.camera_info(7), Err(Error::NoDevice(_))));
    }

    struct Statuses(Arc<Mutex<Vec<(u32, DeviceStatus)>>>);

    impl ModuleCallbacks for Statuses {
        fn camera_device_status_change(&self, camera_id: u32, status: DeviceStatus) {
            self.0.lock().unwrap().push((camera_id, status));
        }
    }

    #[test]
    fn test_status_change_reaches_callbacks() {
        let hal = hal();
        let seen = Arc::new(Mutex::new(Vec::new()));
        hal.set_callbacks(Box::new(Statuses(seen.clone())));

        hal.set_device_status(1, DeviceStatus::Present).unwrap();
        assert!(hal.set_device_status(9, DeviceStatus::Present).is_err());
        assert_eq!(*seen.lock().unwrap(), vec![(1, DeviceStatus::Present)]);
    }
}

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::carrier::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> Permission;

    /// Single-shot position fix. May never resolve on a device without signal;
    /// callers bound it with a timeout.
    async fn current_position(&self) -> Result<GeoPoint, AppError>;
}

#[derive(Debug, Clone, Copy)]
enum Fix {
    At(GeoPoint),
    Unavailable,
    Stalled,
}

pub struct SimulatedLocation {
    permission: Mutex<Permission>,
    fix: Mutex<Fix>,
}

impl SimulatedLocation {
    pub fn at(point: GeoPoint) -> Self {
        Self {
            permission: Mutex::new(Permission::Granted),
            fix: Mutex::new(Fix::At(point)),
        }
    }

    pub fn denied() -> Self {
        Self {
            permission: Mutex::new(Permission::Denied),
            fix: Mutex::new(Fix::Unavailable),
        }
    }

    pub fn move_to(&self, point: GeoPoint) {
        if let Ok(mut fix) = self.fix.lock() {
            *fix = Fix::At(point);
        }
    }

    /// The next fixes never resolve.
    pub fn stall(&self) {
        if let Ok(mut fix) = self.fix.lock() {
            *fix = Fix::Stalled;
        }
    }

    fn fix(&self) -> Fix {
        self.fix.lock().map(|fix| *fix).unwrap_or(Fix::Unavailable)
    }
}

#[async_trait]
impl LocationProvider for SimulatedLocation {
    async fn request_permission(&self) -> Permission {
        self.permission
            .lock()
            .map(|permission| *permission)
            .unwrap_or(Permission::Denied)
    }

    async fn current_position(&self) -> Result<GeoPoint, AppError> {
        match self.fix() {
            Fix::At(point) => Ok(point),
            Fix::Unavailable => Err(AppError::Unavailable("no location fix".to_string())),
            Fix::Stalled => std::future::pending().await,
        }
    }
}

use crate::engine::{EngineError, EngineHandle};
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "org.facematch.FaceMatch1";
pub const OBJECT_PATH: &str = "/org/facematch/FaceMatch1";

/// D-Bus interface for the FaceMatch daemon.
///
/// Bus name: org.facematch.FaceMatch1
/// Object path: /org/facematch/FaceMatch1
pub struct FaceMatchService {
    engine: EngineHandle,
}

impl FaceMatchService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Image(e) => zbus::fdo::Error::InvalidArgs(format!("cannot read image: {e}")),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.facematch.FaceMatch1")]
impl FaceMatchService {
    /// Enroll one face sample from an image file. Returns the new record id.
    async fn enroll(&self, person_id: i64, person_name: &str, image_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(person_id, person_name, image_path, "enroll requested");
        let record_id = self
            .engine
            .enroll(person_id, person_name, PathBuf::from(image_path))
            .await
            .map_err(to_fdo)?;
        Ok(record_id.to_string())
    }

    /// Remove every sample of a person. Returns how many were removed.
    async fn unenroll(&self, person_id: i64) -> zbus::fdo::Result<u32> {
        tracing::info!(person_id, "unenroll requested");
        let removed = self.engine.unenroll(person_id).await.map_err(to_fdo)?;
        Ok(removed as u32)
    }

    /// Recognize every face in an image file. Returns the frame report as JSON.
    ///
    /// A newer request from the same bus connection supersedes one still in
    /// flight, which then fails; requests from other connections are unaffected.
    async fn recognize(
        &self,
        image_path: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> zbus::fdo::Result<String> {
        let caller = header.sender().map(|s| s.to_string()).unwrap_or_default();
        tracing::debug!(image_path, %caller, "recognize requested");
        let report = self
            .engine
            .recognize(&caller, PathBuf::from(image_path))
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// List enrolled people as JSON.
    async fn list_people(&self) -> zbus::fdo::Result<String> {
        let people = self.engine.people().map_err(to_fdo)?;
        to_json(&people)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.engine.status().to_string())
    }
}

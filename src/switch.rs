//! Read-only operations on access switches (Huawei, Cisco, Ruijie).

use std::sync::Arc;

use crate::device::DeviceKind;
use crate::error::ConnectError;
use crate::session::DeviceSession;
use crate::templates::{Action, TemplateParams};

/// A switch reached through a logged-in session.
#[derive(Clone)]
pub struct Switch {
    session: Arc<DeviceSession>,
}

impl Switch {
    pub fn new(session: Arc<DeviceSession>) -> Result<Self, ConnectError> {
        if session.family().kind() != DeviceKind::Switch {
            return Err(ConnectError::UnsupportedAction {
                action: "switch operations".to_string(),
                family: session.family().to_string(),
            });
        }
        Ok(Self { session })
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// Description table of every interface.
    pub async fn interface_descriptions(&self) -> Result<String, ConnectError> {
        let result = self
            .session
            .run(Action::InterfaceDescription, &TemplateParams::new())
            .await?;
        Ok(result.cleaned)
    }

    /// Full status of one interface, e.g. `GigabitEthernet0/0/1`.
    pub async fn interface_status(&self, interface: &str) -> Result<String, ConnectError> {
        let params = TemplateParams::new().with("interface", interface.trim());
        let result = self.session.run(Action::InterfaceStatus, &params).await?;
        Ok(result.cleaned)
    }
}

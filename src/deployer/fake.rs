/// In-memory [`ManagementApi`] that records every call
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

use crate::azure::models::{CredentialResult, ResourceGroupProperties};
use crate::azure::{
    AccessToken, ArmError, ClusterRef, CredentialKind, CredentialResults, DeleteOperation,
    DeletionStatus, ManagementApi, ResourceGroup,
};

/// Scripted answer for one credential request
#[derive(Debug, Clone)]
pub(crate) enum CredentialReply {
    NotFound,
    Status(u16),
    Kubeconfig(Vec<u8>),
    Empty,
}

pub(crate) struct FakeCloud {
    pub auth_fails: bool,
    /// Status returned by the cluster PUT; `None` accepts it
    pub create_status: Option<u16>,
    /// Replies for successive credential requests; the last one repeats
    pub credential_replies: Mutex<VecDeque<CredentialReply>>,
    /// Status polls a deletion stays pending for
    pub delete_pending_polls: AtomicU32,
    /// `Retry-After` hint attached to pending status checks
    pub delete_retry_after: Option<std::time::Duration>,

    pub token_calls: AtomicU32,
    pub resource_groups: Mutex<Vec<(String, String)>>,
    pub cluster_puts: Mutex<Vec<(ClusterRef, String)>>,
    pub credential_calls: Mutex<Vec<(CredentialKind, Instant)>>,
    pub deletions: Mutex<Vec<String>>,
    pub delete_polls: AtomicU32,
    pub delete_poll_times: Mutex<Vec<Instant>>,
    pub events: Mutex<Vec<&'static str>>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self {
            auth_fails: false,
            create_status: None,
            credential_replies: Mutex::new(VecDeque::from([CredentialReply::Kubeconfig(
                b"apiVersion: v1\nkind: Config\n".to_vec(),
            )])),
            delete_pending_polls: AtomicU32::new(0),
            delete_retry_after: None,
            token_calls: AtomicU32::new(0),
            resource_groups: Mutex::new(Vec::new()),
            cluster_puts: Mutex::new(Vec::new()),
            credential_calls: Mutex::new(Vec::new()),
            deletions: Mutex::new(Vec::new()),
            delete_polls: AtomicU32::new(0),
            delete_poll_times: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        }
    }
}

impl FakeCloud {
    pub fn with_credential_replies(replies: Vec<CredentialReply>) -> Self {
        Self {
            credential_replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    fn event(&self, name: &'static str) {
        self.events.lock().unwrap().push(name);
    }
}

#[async_trait]
impl ManagementApi for FakeCloud {
    async fn get_token(&self) -> Result<AccessToken, ArmError> {
        self.event("token");
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if self.auth_fails {
            return Err(ArmError::Authentication(
                "invalid_client: AADSTS7000215".to_string(),
            ));
        }
        Ok(AccessToken::new("token", Utc::now() + Duration::hours(1)))
    }

    async fn create_or_update_resource_group(
        &self,
        _token: &AccessToken,
        name: &str,
        location: &str,
    ) -> Result<ResourceGroup, ArmError> {
        self.event("resource_group");
        self.resource_groups
            .lock()
            .unwrap()
            .push((name.to_string(), location.to_string()));
        Ok(ResourceGroup {
            id: format!("/subscriptions/sub/resourceGroups/{}", name),
            name: name.to_string(),
            location: location.to_string(),
            properties: Some(ResourceGroupProperties {
                provisioning_state: Some("Succeeded".to_string()),
            }),
        })
    }

    async fn create_managed_cluster(
        &self,
        _token: &AccessToken,
        cluster: &ClusterRef,
        body: String,
    ) -> Result<(), ArmError> {
        self.event("create_cluster");
        self.cluster_puts
            .lock()
            .unwrap()
            .push((cluster.clone(), body));
        match self.create_status {
            Some(status) => Err(ArmError::from_status(status, "")),
            None => Ok(()),
        }
    }

    async fn list_cluster_credentials(
        &self,
        _token: &AccessToken,
        _cluster: &ClusterRef,
        kind: CredentialKind,
    ) -> Result<CredentialResults, ArmError> {
        self.event("credentials");
        self.credential_calls
            .lock()
            .unwrap()
            .push((kind, Instant::now()));

        let reply = {
            let mut replies = self.credential_replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        };

        match reply.unwrap_or(CredentialReply::Empty) {
            CredentialReply::NotFound => Err(ArmError::from_status(404, "")),
            CredentialReply::Status(status) => Err(ArmError::from_status(status, "")),
            CredentialReply::Kubeconfig(value) => Ok(CredentialResults {
                kubeconfigs: vec![CredentialResult {
                    name: "clusterAdmin".to_string(),
                    value,
                }],
            }),
            CredentialReply::Empty => Ok(CredentialResults::default()),
        }
    }

    async fn begin_delete_resource_group(
        &self,
        _token: &AccessToken,
        name: &str,
    ) -> Result<DeleteOperation, ArmError> {
        self.event("delete");
        self.deletions.lock().unwrap().push(name.to_string());
        Ok(DeleteOperation::Pending {
            status_url: format!("https://management.example/operations/{}", name),
        })
    }

    async fn deletion_status(
        &self,
        _token: &AccessToken,
        _operation: &DeleteOperation,
    ) -> Result<DeletionStatus, ArmError> {
        self.delete_poll_times.lock().unwrap().push(Instant::now());
        let polls = self.delete_polls.fetch_add(1, Ordering::SeqCst);
        if polls >= self.delete_pending_polls.load(Ordering::SeqCst) {
            Ok(DeletionStatus::Finished)
        } else {
            Ok(DeletionStatus::Pending {
                retry_after: self.delete_retry_after,
            })
        }
    }
}

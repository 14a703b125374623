use serde::Serialize;

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct Status {
    pub zones: Vec<String>,
    pub acme: Option<AcmeStatus>,
    pub dkim: Option<Vec<DkimProvider>>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct AcmeStatus {
    pub pending_challenges: usize,
}

#[derive(Serialize, Debug, Clone, Default, Ord, PartialOrd, Eq, PartialEq)]
pub(super) struct DkimProvider {
    pub provider: String,
    /// RFC 3339 time of the last announcement.
    pub updated_at: String,
}

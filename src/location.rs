//! Where the current process lives.
//!
//! A [`Location`] is populated once from the hosting process's self-description and
//! then shared read-only (typically as `Arc<Location>`) by every routing decision.

/// Routing context of the local process: geography, live partition and lane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct Location {
    region: Option<String>,
    zone: Option<String>,
    live_space_id: Option<u64>,
    unit: Option<String>,
    cell: Option<String>,
    lane_space_id: Option<u64>,
    lane: Option<String>,
    cluster: Option<String>,
    host: Option<String>,
    ip: Option<String>,
}

macro_rules! location_accessors {
    ($($field:ident),* $(,)?) => {
        impl Location {
            $(
                #[allow(missing_docs)]
                pub fn $field(&self) -> Option<&str> {
                    self.$field.as_deref()
                }
            )*
        }

        impl LocationBuilder {
            $(
                #[allow(missing_docs)]
                pub fn $field(mut self, value: impl Into<String>) -> Self {
                    self.inner.$field = Some(value.into());
                    self
                }
            )*
        }
    };
}

location_accessors!(
    region,
    zone,
    unit,
    cell,
    lane,
    cluster,
    host,
    ip,
);

impl Location {
    /// Start building a location.
    pub fn builder() -> LocationBuilder {
        LocationBuilder::default()
    }

    /// Live space identifier.
    pub fn live_space_id(&self) -> Option<u64> {
        self.live_space_id
    }

    /// Lane space identifier.
    pub fn lane_space_id(&self) -> Option<u64> {
        self.lane_space_id
    }

    /// True when the process belongs to a live space unit.
    pub fn is_live(&self) -> bool {
        self.live_space_id.is_some() && self.unit.is_some()
    }
}

/// Builder for [`Location`].
#[derive(Debug, Default, Clone)]
pub struct LocationBuilder {
    inner: Location,
}

impl LocationBuilder {
    /// Set the live space id.
    pub fn live_space_id(mut self, id: u64) -> Self {
        self.inner.live_space_id = Some(id);
        self
    }

    /// Set the lane space id.
    pub fn lane_space_id(mut self, id: u64) -> Self {
        self.inner.lane_space_id = Some(id);
        self
    }

    pub fn build(self) -> Location {
        self.inner
    }
}

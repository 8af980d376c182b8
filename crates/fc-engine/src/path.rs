//! Paths
//!
//! A path is the control plane's unit of pipeline construction: an origin
//! writer, a destination reader and an ordered list of mid filters between
//! them. Once connected, the data plane only knows the per-filter
//! connections; the path record exists so the control plane can tear the
//! fragment down as a unit and attribute statistics to it.

/// Named linear pipeline fragment between two endpoint filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    origin_filter: i32,
    destination_filter: i32,
    origin_writer: i32,
    destination_reader: i32,
    mid_filters: Vec<i32>,
}

impl Path {
    pub fn new(
        origin_filter: i32,
        destination_filter: i32,
        origin_writer: i32,
        destination_reader: i32,
        mid_filters: Vec<i32>,
    ) -> Self {
        Self { origin_filter, destination_filter, origin_writer, destination_reader, mid_filters }
    }

    pub fn origin_filter(&self) -> i32 {
        self.origin_filter
    }

    pub fn destination_filter(&self) -> i32 {
        self.destination_filter
    }

    pub fn origin_writer(&self) -> i32 {
        self.origin_writer
    }

    pub fn destination_reader(&self) -> i32 {
        self.destination_reader
    }

    pub fn mid_filters(&self) -> &[i32] {
        &self.mid_filters
    }

    /// True if `filter_id` participates in this path as endpoint or mid.
    pub fn has_filter(&self, filter_id: i32) -> bool {
        self.origin_filter == filter_id
            || self.destination_filter == filter_id
            || self.mid_filters.contains(&filter_id)
    }
}

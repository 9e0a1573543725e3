use crate::{maker::ExistingBehavior, page::PageCompression, source::ChannelInstruction};

/// Default number of buffered keys between page-size checks.
pub const DEFAULT_LIMIT_CHECK_FREQUENCY: usize = 100;
/// Default number of keys between progress events.
pub const DEFAULT_PRINT_STATUS_FREQUENCY: usize = 100;
/// Default name of the header tome.
pub const DEFAULT_HEADER_NAME: &str = "header";
/// Default header column holding a key's source locator.
pub const DEFAULT_LOCATOR_COLUMN: &str = "ds_path";
/// Default directory depth of source records below the source root.
pub const DEFAULT_PATH_DEPTH: usize = 4;

/// Page flush policy for a [`Scribe`](crate::scribe::Scribe).
#[derive(Debug, Clone, PartialEq)]
pub struct PagingOptions {
    pub(crate) max_page_size_mb: Option<f64>,
    pub(crate) max_page_row_count: Option<usize>,
    pub(crate) limit_check_frequency: usize,
    pub(crate) compression: PageCompression,
}

impl Default for PagingOptions {
    fn default() -> Self {
        PagingOptions {
            max_page_size_mb: None,
            max_page_row_count: None,
            limit_check_frequency: DEFAULT_LIMIT_CHECK_FREQUENCY,
            compression: PageCompression::default(),
        }
    }
}

impl PagingOptions {
    /// Flush once the buffered rows occupy more than `max_page_size_mb` of memory.
    pub fn max_page_size_mb(self, max_page_size_mb: Option<f64>) -> Self {
        PagingOptions {
            max_page_size_mb,
            ..self
        }
    }

    /// Flush once more than `max_page_row_count` rows are buffered.
    pub fn max_page_row_count(self, max_page_row_count: Option<usize>) -> Self {
        PagingOptions {
            max_page_row_count,
            ..self
        }
    }

    /// Check the limits every `limit_check_frequency` buffered keys (at least 1).
    pub fn limit_check_frequency(self, limit_check_frequency: usize) -> Self {
        PagingOptions {
            limit_check_frequency: limit_check_frequency.max(1),
            ..self
        }
    }

    pub fn compression(self, compression: PageCompression) -> Self {
        PagingOptions {
            compression,
            ..self
        }
    }

    pub fn get_max_page_size_mb(&self) -> Option<f64> {
        self.max_page_size_mb
    }

    pub fn get_max_page_row_count(&self) -> Option<usize> {
        self.max_page_row_count
    }

    pub fn get_limit_check_frequency(&self) -> usize {
        self.limit_check_frequency
    }
}

/// Options for one [`TomeMaker`](crate::maker::TomeMaker) build.
#[derive(Debug, Clone, PartialEq)]
pub struct MakeOptions {
    pub(crate) header_tome_name: Option<String>,
    pub(crate) instructions: Option<Vec<ChannelInstruction>>,
    pub(crate) paging: PagingOptions,
    pub(crate) behavior_if_complete: ExistingBehavior,
    pub(crate) behavior_if_partial: ExistingBehavior,
    pub(crate) print_status_frequency: usize,
}

impl Default for MakeOptions {
    fn default() -> Self {
        MakeOptions {
            header_tome_name: None,
            instructions: None,
            paging: PagingOptions::default(),
            behavior_if_complete: ExistingBehavior::Pass,
            behavior_if_partial: ExistingBehavior::Continue,
            print_status_frequency: DEFAULT_PRINT_STATUS_FREQUENCY,
        }
    }
}

impl MakeOptions {
    /// Build against this header instead of the curator's default header.
    pub fn header_tome_name(self, header_tome_name: impl Into<String>) -> Self {
        MakeOptions {
            header_tome_name: Some(header_tome_name.into()),
            ..self
        }
    }

    /// Channels (and columns) to fetch for every key; `None` reads everything.
    pub fn instructions(self, instructions: Option<Vec<ChannelInstruction>>) -> Self {
        MakeOptions {
            instructions,
            ..self
        }
    }

    pub fn paging(self, paging: PagingOptions) -> Self {
        MakeOptions { paging, ..self }
    }

    pub fn behavior_if_complete(self, behavior_if_complete: ExistingBehavior) -> Self {
        MakeOptions {
            behavior_if_complete,
            ..self
        }
    }

    pub fn behavior_if_partial(self, behavior_if_partial: ExistingBehavior) -> Self {
        MakeOptions {
            behavior_if_partial,
            ..self
        }
    }

    /// Emit a progress event every `print_status_frequency` keys (at least 1).
    pub fn print_status_frequency(self, print_status_frequency: usize) -> Self {
        MakeOptions {
            print_status_frequency: print_status_frequency.max(1),
            ..self
        }
    }
}

/// Options for building a header tome from discovered source records.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderTomeOptions {
    pub(crate) path_depth: usize,
    pub(crate) paging: PagingOptions,
}

impl Default for HeaderTomeOptions {
    fn default() -> Self {
        HeaderTomeOptions {
            path_depth: DEFAULT_PATH_DEPTH,
            paging: PagingOptions::default(),
        }
    }
}

impl HeaderTomeOptions {
    /// Records sit `path_depth` directories below the source root.
    pub fn path_depth(self, path_depth: usize) -> Self {
        HeaderTomeOptions { path_depth, ..self }
    }

    pub fn paging(self, paging: PagingOptions) -> Self {
        HeaderTomeOptions { paging, ..self }
    }
}

/// Collection-wide settings for a [`TomeCurator`](crate::curator::TomeCurator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuratorOptions {
    pub(crate) ds_type: String,
    pub(crate) default_header_name: String,
    pub(crate) prefix: Option<String>,
    pub(crate) locator_column: String,
}

impl CuratorOptions {
    pub fn new(ds_type: impl Into<String>) -> Self {
        CuratorOptions {
            ds_type: ds_type.into(),
            default_header_name: DEFAULT_HEADER_NAME.to_string(),
            prefix: None,
            locator_column: DEFAULT_LOCATOR_COLUMN.to_string(),
        }
    }

    pub fn default_header_name(self, default_header_name: impl Into<String>) -> Self {
        CuratorOptions {
            default_header_name: default_header_name.into(),
            ..self
        }
    }

    /// Nest every tome of the collection under `prefix`.
    pub fn prefix(self, prefix: Option<String>) -> Self {
        CuratorOptions { prefix, ..self }
    }

    pub fn locator_column(self, locator_column: impl Into<String>) -> Self {
        CuratorOptions {
            locator_column: locator_column.into(),
            ..self
        }
    }

    pub fn ds_type(&self) -> &str {
        &self.ds_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let paging = PagingOptions::default();
        assert_eq!(paging.get_limit_check_frequency(), 100);
        assert_eq!(paging.get_max_page_row_count(), None);
        assert_eq!(paging.get_max_page_size_mb(), None);

        let make = MakeOptions::default();
        assert_eq!(make.behavior_if_complete, ExistingBehavior::Pass);
        assert_eq!(make.behavior_if_partial, ExistingBehavior::Continue);
        assert_eq!(make.print_status_frequency, 100);
    }

    #[test]
    fn frequencies_are_clamped_to_one() {
        assert_eq!(
            PagingOptions::default()
                .limit_check_frequency(0)
                .get_limit_check_frequency(),
            1
        );
        assert_eq!(
            MakeOptions::default()
                .print_status_frequency(0)
                .print_status_frequency,
            1
        );
    }
}

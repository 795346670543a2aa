//! OTLP Trace Subscriber Settings.

use tracing::level_filters::LevelFilter;

use super::{Settings, SettingsBuilder, SettingsToggle};

/// Configure specific settings for the OTLP trace subscriber.
#[derive(Debug, Default, Eq, PartialEq)]
pub enum OtlpTraceSettings {
    /// OTLP trace subscriber disabled.
    #[default]
    Disabled,

    /// OTLP trace subscriber enabled.
    Enabled {
        /// Common subscriber settings that apply to the OTLP trace
        /// subscriber.
        common_settings: Settings,
    },
}

impl SettingsToggle for OtlpTraceSettings {
    fn is_enabled(&self) -> bool {
        match self {
            OtlpTraceSettings::Disabled => false,
            OtlpTraceSettings::Enabled { .. } => true,
        }
    }
}

/// For building [`OtlpTraceSettings`].
///
/// <div class="warning">
/// Do not use directly, instead use the [`Settings::builder`] associated function.
/// </div>
pub struct OtlpTraceSettingsBuilder {
    pub(crate) common_settings: Settings,
}

impl OtlpTraceSettingsBuilder {
    /// Consumes self and returns a valid [`OtlpTraceSettings`] instance.
    pub fn build(self) -> OtlpTraceSettings {
        OtlpTraceSettings::Enabled {
            common_settings: self.common_settings,
        }
    }
}

/// This implementation is used to turn the common settings builder into the
/// OTLP trace specific settings builder via the
/// [`SettingsBuilder::otlp_trace_settings_builder`] function.
impl From<SettingsBuilder> for OtlpTraceSettingsBuilder {
    fn from(value: SettingsBuilder) -> Self {
        Self {
            common_settings: value.build(),
        }
    }
}

impl From<Settings> for OtlpTraceSettings {
    fn from(common_settings: Settings) -> Self {
        Self::Enabled { common_settings }
    }
}

impl From<(&'static str, LevelFilter)> for OtlpTraceSettings {
    fn from(value: (&'static str, LevelFilter)) -> Self {
        Self::Enabled {
            common_settings: Settings {
                environment_variable: value.0,
                default_level: value.1,
            },
        }
    }
}

impl From<(&'static str, LevelFilter, bool)> for OtlpTraceSettings {
    fn from(value: (&'static str, LevelFilter, bool)) -> Self {
        match value.2 {
            true => Self::from((value.0, value.1)),
            false => Self::Disabled,
        }
    }
}

impl<T> From<Option<T>> for OtlpTraceSettings
where
    T: Into<OtlpTraceSettings>,
{
    fn from(settings: Option<T>) -> Self {
        match settings {
            Some(settings) => settings.into(),
            None => OtlpTraceSettings::default(),
        }
    }
}

//! Configuration surface.
//!
//! An enumerated option space with scalar values per option. Options that
//! describe installed hardware are locked while the machine is powered on.

use commodore_agnus::VideoStandard;

use crate::error::AmigaError;

/// Chip revisions selectable per component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgnusRevision {
    Ocs8367,
    #[default]
    Ecs8372,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeniseRevision {
    #[default]
    Ocs8362,
    Ecs8373,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CiaRevision {
    #[default]
    Mos8520Dip,
    Mos8520Plcc,
}

/// Blitter fidelity: `Exact` paces each word through DMA slots, `Fast`
/// finishes a blit in one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlitterAccuracy {
    Fast,
    #[default]
    Exact,
}

/// The enumerated option space of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOption {
    VideoFormat,
    AgnusRevision,
    DeniseRevision,
    CiaRevision,
    ChipRam,
    SlowRam,
    FastRam,
    DriveSpeed,
    BlitterAccuracy,
    PointerDrops,
    TodBug,
    FloatingBusPattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmigaConfig {
    pub video: VideoStandard,
    pub agnus_revision: AgnusRevision,
    pub denise_revision: DeniseRevision,
    pub cia_revision: CiaRevision,
    /// RAM sizes in bytes; chip and slow must be powers of two.
    pub chip_ram: usize,
    pub slow_ram: usize,
    pub fast_ram: usize,
    /// Disk rotation speed multiplier (1 = original).
    pub drive_speed: u32,
    pub blitter_accuracy: BlitterAccuracy,
    pub pointer_drops: bool,
    pub tod_bug: bool,
    pub floating_bus_pattern: u8,
}

impl Default for AmigaConfig {
    fn default() -> Self {
        Self {
            video: VideoStandard::Pal,
            agnus_revision: AgnusRevision::default(),
            denise_revision: DeniseRevision::default(),
            cia_revision: CiaRevision::default(),
            chip_ram: 512 * 1024,
            slow_ram: 512 * 1024,
            fast_ram: 0,
            drive_speed: 1,
            blitter_accuracy: BlitterAccuracy::default(),
            pointer_drops: false,
            tod_bug: true,
            floating_bus_pattern: 0xFF,
        }
    }
}

impl ConfigOption {
    /// Options describing soldered-in hardware may not change while the
    /// machine is powered.
    #[must_use]
    pub fn locked_while_powered(self) -> bool {
        matches!(
            self,
            Self::VideoFormat
                | Self::AgnusRevision
                | Self::DeniseRevision
                | Self::CiaRevision
                | Self::ChipRam
                | Self::SlowRam
                | Self::FastRam
        )
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::VideoFormat => "VIDEO_FORMAT",
            Self::AgnusRevision => "AGNUS_REVISION",
            Self::DeniseRevision => "DENISE_REVISION",
            Self::CiaRevision => "CIA_REVISION",
            Self::ChipRam => "CHIP_RAM",
            Self::SlowRam => "SLOW_RAM",
            Self::FastRam => "FAST_RAM",
            Self::DriveSpeed => "DRIVE_SPEED",
            Self::BlitterAccuracy => "BLITTER_ACCURACY",
            Self::PointerDrops => "POINTER_DROPS",
            Self::TodBug => "TOD_BUG",
            Self::FloatingBusPattern => "FLOATING_BUS",
        }
    }
}

impl AmigaConfig {
    /// Apply a scalar option value, honoring locks and validity.
    pub fn set_option(
        &mut self,
        option: ConfigOption,
        value: i64,
        powered: bool,
    ) -> Result<(), AmigaError> {
        if powered && option.locked_while_powered() {
            return Err(AmigaError::OptionLocked(option.name()));
        }
        match option {
            ConfigOption::VideoFormat => {
                self.video = match value {
                    0 => VideoStandard::Pal,
                    1 => VideoStandard::Ntsc,
                    _ => return Err(AmigaError::OptionInvalidArg(value.to_string())),
                };
            }
            ConfigOption::AgnusRevision => {
                self.agnus_revision = match value {
                    0 => AgnusRevision::Ocs8367,
                    1 => AgnusRevision::Ecs8372,
                    _ => return Err(AmigaError::OptionInvalidArg(value.to_string())),
                };
            }
            ConfigOption::DeniseRevision => {
                self.denise_revision = match value {
                    0 => DeniseRevision::Ocs8362,
                    1 => DeniseRevision::Ecs8373,
                    _ => return Err(AmigaError::OptionInvalidArg(value.to_string())),
                };
            }
            ConfigOption::CiaRevision => {
                self.cia_revision = match value {
                    0 => CiaRevision::Mos8520Dip,
                    1 => CiaRevision::Mos8520Plcc,
                    _ => return Err(AmigaError::OptionInvalidArg(value.to_string())),
                };
            }
            ConfigOption::ChipRam => {
                let bytes = usize::try_from(value)
                    .map_err(|_| AmigaError::OptionInvalidArg(value.to_string()))?;
                if !bytes.is_power_of_two() || !(256 * 1024..=2 * 1024 * 1024).contains(&bytes) {
                    return Err(AmigaError::OptionInvalidArg(value.to_string()));
                }
                self.chip_ram = bytes;
            }
            ConfigOption::SlowRam => {
                let bytes = usize::try_from(value)
                    .map_err(|_| AmigaError::OptionInvalidArg(value.to_string()))?;
                if bytes != 0 && (!bytes.is_power_of_two() || bytes > 2 * 1024 * 1024) {
                    return Err(AmigaError::OptionInvalidArg(value.to_string()));
                }
                self.slow_ram = bytes;
            }
            ConfigOption::FastRam => {
                let bytes = usize::try_from(value)
                    .map_err(|_| AmigaError::OptionInvalidArg(value.to_string()))?;
                if bytes % (64 * 1024) != 0 || bytes > 8 * 1024 * 1024 {
                    return Err(AmigaError::OptionInvalidArg(value.to_string()));
                }
                self.fast_ram = bytes;
            }
            ConfigOption::DriveSpeed => {
                if !(1..=128).contains(&value) {
                    return Err(AmigaError::OptionInvalidArg(value.to_string()));
                }
                self.drive_speed = value as u32;
            }
            ConfigOption::BlitterAccuracy => {
                self.blitter_accuracy = match value {
                    0 => BlitterAccuracy::Fast,
                    1 => BlitterAccuracy::Exact,
                    _ => return Err(AmigaError::OptionInvalidArg(value.to_string())),
                };
            }
            ConfigOption::PointerDrops => self.pointer_drops = value != 0,
            ConfigOption::TodBug => self.tod_bug = value != 0,
            ConfigOption::FloatingBusPattern => {
                self.floating_bus_pattern = u8::try_from(value)
                    .map_err(|_| AmigaError::OptionInvalidArg(value.to_string()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_options_lock_while_powered() {
        let mut config = AmigaConfig::default();
        let err = config.set_option(ConfigOption::ChipRam, 1024 * 1024, true);
        assert_eq!(err, Err(AmigaError::OptionLocked("CHIP_RAM")));
        assert_eq!(config.chip_ram, 512 * 1024);

        config
            .set_option(ConfigOption::ChipRam, 1024 * 1024, false)
            .expect("unlocked while off");
        assert_eq!(config.chip_ram, 1024 * 1024);
    }

    #[test]
    fn fidelity_knobs_stay_adjustable_while_powered() {
        let mut config = AmigaConfig::default();
        config
            .set_option(ConfigOption::TodBug, 0, true)
            .expect("knob not locked");
        assert!(!config.tod_bug);
        config
            .set_option(ConfigOption::PointerDrops, 1, true)
            .expect("knob not locked");
        assert!(config.pointer_drops);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = AmigaConfig::default();
        assert!(config.set_option(ConfigOption::ChipRam, 300 * 1024, false).is_err());
        assert!(config.set_option(ConfigOption::VideoFormat, 7, false).is_err());
        assert!(config.set_option(ConfigOption::DriveSpeed, 0, false).is_err());
    }
}

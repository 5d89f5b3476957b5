//! Component capability set.
//!
//! Hardware models are plain structs owned by the machine. Instead of a
//! deep inheritance chain, each model opts into the shared capabilities
//! through this trait; the machine walks its component list for resets and
//! inspection.

/// A hardware model that participates in machine-wide operations.
///
/// Inspection returns a plain-old-data record. The machine copies these
/// records into its double-buffered inspector between frames; queries never
/// mutate emulation state.
pub trait Component {
    /// Inspection record type (a `Copy`-friendly snapshot of public state).
    type Info;

    /// Short component name for logs and dumps.
    fn name(&self) -> &'static str;

    /// Reset the component. A hard reset restores power-on state; a soft
    /// reset only clears what the hardware's RESET line clears.
    fn reset(&mut self, hard: bool);

    /// Produce an inspection record of the current state.
    fn inspect(&self) -> Self::Info;
}

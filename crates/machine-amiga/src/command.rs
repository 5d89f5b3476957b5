//! Host command queue.
//!
//! Host-facing threads never touch machine state directly; they push typed
//! commands into a lock-free queue that the emulation loop drains at frame
//! boundaries. Results travel back on a second queue.

use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};

use crate::error::AmigaError;

/// Commands the host may submit.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reset,
    HardReset,
    InsertDisk(Vec<u8>),
    EjectDisk,
    KeyPress(u8),
    KeyRelease(u8),
    MouseMove { dx: i16, dy: i16 },
    MouseButton { button: u8, down: bool },
    JoystickAxis { horizontal: i8, vertical: i8 },
    JoystickButton { button: u8, down: bool },
    PowerOn,
    PowerOff,
    Pause,
    Run,
    StepInto,
    StepOver,
}

/// One processed command's outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub command: &'static str,
    pub result: Result<(), AmigaError>,
}

/// The host's handle: submit commands, poll results.
pub struct CommandSender {
    commands: ringbuf::HeapProd<Command>,
    results: ringbuf::HeapCons<CommandResult>,
}

impl CommandSender {
    /// Enqueue a command; fails when the queue is full (the emulator is
    /// not draining, e.g. suspended for a long host operation).
    pub fn submit(&mut self, command: Command) -> Result<(), Command> {
        self.commands.try_push(command)
    }

    pub fn poll_result(&mut self) -> Option<CommandResult> {
        self.results.try_pop()
    }
}

/// The emulation side: drain commands, report results.
pub struct CommandReceiver {
    commands: ringbuf::HeapCons<Command>,
    results: ringbuf::HeapProd<CommandResult>,
}

impl CommandReceiver {
    pub fn next(&mut self) -> Option<Command> {
        self.commands.try_pop()
    }

    pub fn report(&mut self, command: &'static str, result: Result<(), AmigaError>) {
        // A full result queue only drops diagnostics, never commands.
        let _ = self.results.try_push(CommandResult { command, result });
    }
}

/// Create a connected queue pair.
#[must_use]
pub fn command_queue(depth: usize) -> (CommandSender, CommandReceiver) {
    let (cmd_prod, cmd_cons) = HeapRb::<Command>::new(depth).split();
    let (res_prod, res_cons) = HeapRb::<CommandResult>::new(depth).split();
    (
        CommandSender {
            commands: cmd_prod,
            results: res_cons,
        },
        CommandReceiver {
            commands: cmd_cons,
            results: res_prod,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_flow_in_submission_order() {
        let (mut tx, mut rx) = command_queue(8);
        tx.submit(Command::PowerOn).expect("queued");
        tx.submit(Command::Run).expect("queued");

        assert_eq!(rx.next(), Some(Command::PowerOn));
        assert_eq!(rx.next(), Some(Command::Run));
        assert_eq!(rx.next(), None);
    }

    #[test]
    fn results_travel_back() {
        let (mut tx, mut rx) = command_queue(8);
        rx.report("RESET", Ok(()));
        rx.report("INSERT_DISK", Err(AmigaError::FileTooSmall));

        assert_eq!(tx.poll_result().expect("first").result, Ok(()));
        assert_eq!(
            tx.poll_result().expect("second").result,
            Err(AmigaError::FileTooSmall)
        );
    }

    #[test]
    fn full_queue_rejects_instead_of_blocking() {
        let (mut tx, _rx) = command_queue(1);
        tx.submit(Command::Pause).expect("fits");
        assert_eq!(tx.submit(Command::Run), Err(Command::Run));
    }
}

//! Console-backed logging (SPEC_FULL.md §B). `kprintln!` writes a
//! formatted line through a [`Console`](crate::device::Console) instead
//! of `std::println!`, so the process-exit line (spec.md §4.6:
//! `"<name>: exit(<status>)"`) and subsystem trace points cross the same
//! boundary spec.md §1 and §6 put the console behind, and tests can
//! capture them through `MemConsole`.
//!
//! Grounded on `kernel-rs/src/printf.rs`'s `print!`/`println!` pair,
//! retargeted from a global static `Writer` to an explicit `&dyn
//! Console` argument: this crate has no singleton kernel instance to
//! hang a global writer off of, and every subsystem here already takes
//! its collaborators as explicit parameters rather than through statics.

/// Formats `$($arg)*` and writes it to `$console` (a `&dyn Console`) in
/// one call, matching spec.md §6's "fd 1 writes the whole buffer in one
/// call" contract.
#[macro_export]
macro_rules! kprintln {
    ($console:expr, $($arg:tt)*) => {
        $console.write_all(format!($($arg)*).as_bytes())
    };
}

#[cfg(test)]
mod tests {
    use crate::device::{Console, MemConsole};

    #[test]
    fn kprintln_writes_a_formatted_line_to_the_console() {
        let console = MemConsole::new();
        kprintln!(&console, "{}: exit({})\n", "echo", -1);
        assert_eq!(console.output_string(), "echo: exit(-1)\n");
    }
}

//! x86-64 (+AVX) architectural state.

use symterm::Sort;

use super::Architecture;

/// The x86-64+AVX architecture: one 64-bit-addressed, byte-valued memory
/// array, the status flags, the 64-bit general registers plus `RIP`, the
/// four segment bases, the 16 256-bit AVX registers, and a synthetic
/// `CPUEXN` flag set by `CpuExn`.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Default)]
pub struct X86_64;

const FLAGS: &[&str] = &["CF", "AF", "ZF", "SF", "OF", "PF", "DF"];

const GPRS: &[&str] = &[
    "RAX", "RBX", "RCX", "RDX", "RSI", "RDI", "RBP", "RSP", "R8", "R9", "R10", "R11", "R12",
    "R13", "R14", "R15", "RIP",
];

const SEGMENT_BASES: &[&str] = &["FS_BASE", "GS_BASE", "SS_BASE", "DS_BASE"];

impl Architecture for X86_64 {
    fn arch_state(&self) -> Vec<(String, Sort)> {
        let mut state = Vec::new();
        state.push(("mem64".to_string(), Sort::array(64, 8)));
        for &flag in FLAGS {
            state.push((flag.to_string(), Sort::bv(1)));
        }
        for &reg in GPRS {
            state.push((reg.to_string(), Sort::bv(64)));
        }
        for &base in SEGMENT_BASES {
            state.push((base.to_string(), Sort::bv(64)));
        }
        for i in 0..16 {
            state.push((format!("YMM{i}"), Sort::bv(256)));
        }
        state.push(("CPUEXN".to_string(), Sort::bv(1)));
        state
    }

    fn program_counter(&self) -> &str {
        "RIP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_state_has_expected_cardinality() {
        let state = X86_64.arch_state();
        // mem64 + 7 flags + 17 GPRs (incl. RIP) + 4 segment bases + 16 YMM + CPUEXN
        assert_eq!(state.len(), 1 + 7 + 17 + 4 + 16 + 1);
    }

    #[test]
    fn mem64_is_byte_addressed_array() {
        let state = X86_64.arch_state();
        let (_, sort) = state.iter().find(|(n, _)| n == "mem64").unwrap();
        assert_eq!(*sort, Sort::array(64, 8));
    }

    #[test]
    fn program_counter_is_rip() {
        assert_eq!(X86_64.program_counter(), "RIP");
    }

    #[test]
    fn rip_is_present_at_64_bits() {
        let state = X86_64.arch_state();
        let (_, sort) = state.iter().find(|(n, _)| n == "RIP").unwrap();
        assert_eq!(*sort, Sort::bv(64));
    }
}

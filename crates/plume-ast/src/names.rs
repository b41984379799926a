use smol_str::SmolStr;

/// Unique-name service for the code generator.
///
/// A single monotonic counter mints C identifiers (`prefix__N`). It is
/// resettable between compilations, which makes mangling deterministic:
/// resetting and recompiling the same tree yields byte-identical output.
#[derive(Debug, Default)]
pub struct NameGen {
    counter: u32,
}

impl NameGen {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// `prefix__N` — emitted C identifiers.
    pub fn fresh_c(&mut self, prefix: &str) -> SmolStr {
        let n = self.counter;
        self.counter += 1;
        SmolStr::new(format!("{}__{}", prefix, n))
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sequential() {
        let mut names = NameGen::new();
        assert_eq!(names.fresh_c("f"), "f__0");
        assert_eq!(names.fresh_c("f"), "f__1");
        assert_eq!(names.fresh_c("g"), "g__2");
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut names = NameGen::new();
        names.fresh_c("a");
        names.fresh_c("b");
        names.reset();
        assert_eq!(names.fresh_c("a"), "a__0");
    }
}

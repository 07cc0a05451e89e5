//! Turning the machine state at a call into gadget preconditions.
//!
//! The resolver reads the call target from the program counter and the
//! call arguments from the processor, then decides whether the call can
//! spawn `/bin/sh` and under which constraints. Anything that would make
//! the result depend on the library's load address (a global or static
//! location) is rejected, with one exception: a value loaded twice from a
//! global in the `envp` position is trusted to be `environ`.

use crate::processor::Processor;
use crate::strings::StringLookup;
use crate::symbolic::SymValue;

const BIN_SH: &[u8] = b"/bin/sh";
const SH: &[u8] = b"sh\0";

/// Preconditions and the resulting call, before an offset is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub constraints: Vec<String>,
    pub effect: String,
}

impl Resolution {
    /// Build a resolution, dropping repeated constraints (first one wins).
    pub fn new(constraints: Vec<String>, effect: String) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(constraints.len());
        for constraint in constraints {
            if !unique.contains(&constraint) {
                unique.push(constraint);
            }
        }
        Self { constraints: unique, effect }
    }
}

/// What an argument check demands.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    /// Holds unconditionally.
    Nothing,
    Holds(String),
}

impl Requirement {
    fn push_into(self, constraints: &mut Vec<String>) {
        if let Requirement::Holds(constraint) = self {
            constraints.push(constraint);
        }
    }
}

/// Decides whether a processor state ends in a shell.
pub struct Resolver<'a> {
    lookup: &'a dyn StringLookup,
}

impl<'a> Resolver<'a> {
    pub fn new(lookup: &'a dyn StringLookup) -> Self {
        Self { lookup }
    }

    /// Dispatch on the call target held in the program counter.
    pub fn resolve(&self, processor: &dyn Processor) -> Option<Resolution> {
        let target = processor.call_target();
        if target.contains("execve") {
            self.resolve_execve(processor)
        } else if target.contains("execl") {
            self.resolve_execl(processor)
        } else if target.contains("posix_spawn") {
            self.resolve_posix_spawn(processor)
        } else {
            None
        }
    }

    /// `execve(path, argv, envp)`
    pub fn resolve_execve(&self, processor: &dyn Processor) -> Option<Resolution> {
        if !self.is_bin_sh(&processor.argument(0)) {
            return None;
        }
        let argv = processor.argument(1);
        let envp = processor.argument(2);

        let mut constraints = processor.constraints().to_vec();
        check_argv(processor, &argv, true)?.push_into(&mut constraints);
        let (envp_requirement, envp_term) = check_envp(processor, &envp)?;
        envp_requirement.push_into(&mut constraints);

        Some(Resolution::new(
            constraints,
            format!("execve(\"/bin/sh\", {}, {})", argv, envp_term),
        ))
    }

    /// `execl(path, arg0, ..., NULL)`
    pub fn resolve_execl(&self, processor: &dyn Processor) -> Option<Resolution> {
        if !self.is_bin_sh(&processor.argument(0)) {
            return None;
        }
        let mut args = Vec::new();
        let mut terminator = processor.argument(1);
        if self.is_sh(&terminator) {
            args.push("\"sh\"".to_string());
            terminator = processor.argument(2);
        }

        let mut constraints = processor.constraints().to_vec();
        match &terminator {
            SymValue::Zero => {}
            SymValue::Imm(_) | SymValue::Stack { .. } => return None,
            value if value.is_global_relative() => return None,
            value => constraints.push(format!("{} == NULL", value)),
        }
        args.push(terminator.to_string());

        Some(Resolution::new(
            constraints,
            format!("execl(\"/bin/sh\", {})", args.join(", ")),
        ))
    }

    /// `posix_spawn(pid, path, file_actions, attrp, argv, envp)`
    pub fn resolve_posix_spawn(&self, processor: &dyn Processor) -> Option<Resolution> {
        let pid = processor.argument(0);
        if !self.is_bin_sh(&processor.argument(1)) {
            return None;
        }
        let file_actions = processor.argument(2);
        let attrp = processor.argument(3);
        let argv = processor.argument(4);
        let envp = processor.argument(5);

        let mut constraints = processor.constraints().to_vec();
        check_pid(&pid)?.push_into(&mut constraints);
        check_file_actions(processor, &file_actions)?.push_into(&mut constraints);
        check_attrp(processor, &attrp)?.push_into(&mut constraints);
        check_argv(processor, &argv, false)?.push_into(&mut constraints);
        let (envp_requirement, envp_term) = check_envp(processor, &envp)?;
        envp_requirement.push_into(&mut constraints);

        Some(Resolution::new(
            constraints,
            format!(
                "posix_spawn({}, \"/bin/sh\", {}, {}, {}, {})",
                pid, file_actions, attrp, argv, envp_term
            ),
        ))
    }

    fn is_bin_sh(&self, value: &SymValue) -> bool {
        value
            .global_addr()
            .map_or(false, |addr| self.lookup.holds_str(addr, BIN_SH))
    }

    fn is_sh(&self, value: &SymValue) -> bool {
        value.global_addr().map_or(false, |addr| self.lookup.holds_str(addr, SH))
    }
}

/// NULL-or-empty check shared by `argv` and `envp`.
///
/// A stack address means the array lives on the stack, so its first slot
/// must be NULL. Any other pointer gets the `[p] == NULL || p == NULL`
/// form, or only `[p] == NULL` when a NULL array is not acceptable.
fn check_argv(processor: &dyn Processor, arg: &SymValue, allow_null: bool) -> Option<Requirement> {
    if let Some(offset) = arg.stack_offset() {
        let slot = stack_field(processor, offset, processor.word_size())?;
        return match slot {
            SymValue::Zero => Some(Requirement::Nothing),
            // never NULL
            SymValue::Imm(_) | SymValue::Stack { .. } => None,
            value if value.is_global_relative() => None,
            value => Some(Requirement::Holds(format!("{} == NULL", value))),
        };
    }
    match arg {
        SymValue::Zero if allow_null => Some(Requirement::Nothing),
        SymValue::Zero | SymValue::Imm(_) => None,
        value if value.is_global_relative() => None,
        value if allow_null => Some(Requirement::Holds(format!(
            "{} == NULL || {} == NULL",
            value.deref(),
            value
        ))),
        value => Some(Requirement::Holds(format!("{} == NULL", value.deref()))),
    }
}

/// The value a `width`-byte field at `sp + offset` holds at the call.
///
/// `None` when a stored word only partly covers the field.
fn stack_field(processor: &dyn Processor, offset: i64, width: i64) -> Option<SymValue> {
    let word = processor.word_size();
    let overlapped = processor
        .stack()
        .range(offset - word + 1..offset + width)
        .any(|(start, _)| *start != offset);
    if overlapped {
        return None;
    }
    Some(processor.stack_slot(offset))
}

/// Like [`check_argv`], but `[[global]]` is trusted to be `environ`.
///
/// Returns the requirement and the term to print for `envp`.
fn check_envp(processor: &dyn Processor, arg: &SymValue) -> Option<(Requirement, String)> {
    let (base, depth) = arg.strip_derefs();
    if depth == 2 && base.global_addr().is_some() {
        return Some((Requirement::Nothing, "environ".to_string()));
    }
    let requirement = check_argv(processor, arg, true)?;
    Some((requirement, arg.to_string()))
}

/// The pid out-pointer must be NULL or writable; the stack always is.
fn check_pid(pid: &SymValue) -> Option<Requirement> {
    match pid {
        SymValue::Zero | SymValue::Stack { .. } => Some(Requirement::Nothing),
        SymValue::Imm(_) => None,
        value if value.is_global_relative() => None,
        value => Some(Requirement::Holds(format!(
            "{} == NULL || writable: {}",
            value, value
        ))),
    }
}

/// `file_actions->__used` (signed, at +4) must not be positive.
fn check_file_actions(processor: &dyn Processor, file_actions: &SymValue) -> Option<Requirement> {
    match file_actions {
        SymValue::Zero => Some(Requirement::Nothing),
        SymValue::Imm(_) => None,
        value if value.is_global_relative() => None,
        // a stack address is never NULL
        SymValue::Stack { offset, .. } => {
            match stack_field(processor, offset + 4, 4)? {
                SymValue::Zero => Some(Requirement::Nothing),
                SymValue::Imm(used) if (used as i32) <= 0 => Some(Requirement::Nothing),
                SymValue::Imm(_) | SymValue::Stack { .. } => None,
                used if used.is_global_relative() => None,
                used => Some(Requirement::Holds(format!("(s32){} <= 0", used))),
            }
        }
        value => Some(Requirement::Holds(format!(
            "{} == NULL || (s32){} <= 0",
            value,
            value.add(4).deref()
        ))),
    }
}

/// `attrp->__flags` (unsigned 16-bit, at +0) must be zero.
fn check_attrp(processor: &dyn Processor, attrp: &SymValue) -> Option<Requirement> {
    match attrp {
        SymValue::Zero => Some(Requirement::Nothing),
        SymValue::Imm(_) => None,
        value if value.is_global_relative() => None,
        SymValue::Stack { offset, .. } => match stack_field(processor, *offset, 2)? {
            SymValue::Zero => Some(Requirement::Nothing),
            SymValue::Imm(flags) if (flags as u16) == 0 => Some(Requirement::Nothing),
            SymValue::Imm(_) | SymValue::Stack { .. } => None,
            flags if flags.is_global_relative() => None,
            flags => Some(Requirement::Holds(format!("(u16){} == NULL", flags))),
        },
        value => Some(Requirement::Holds(format!(
            "{} == NULL || (u16){} == NULL",
            value,
            value.deref()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amd64::Amd64Processor;
    use crate::disasm::Instruction;
    use crate::i386::I386Processor;
    use crate::processor::emulate;
    use crate::strings::RawImage;

    const GOT: u64 = 0x1d8000;
    const BINSH_I386: u64 = 0x17b8cf;
    const BINSH_AMD64: u64 = 0x1b3e9a;

    fn image() -> RawImage {
        let mut image = RawImage::new(Vec::new());
        image.place(BINSH_I386 as usize, b"/bin/sh\0");
        image.place(BINSH_AMD64 as usize, b"/bin/sh\0");
        image.place(0x1000, b"/bin/bash\0");
        image.place(0x2000, b"/bin/shell\0");
        image
    }

    fn lines(texts: &[&str]) -> Vec<Instruction> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Instruction::new(0x10 + i as u64, *t))
            .collect()
    }

    fn i386(texts: &[&str], got_reg: &str) -> I386Processor {
        let mut p = I386Processor::with_got(got_reg, GOT);
        assert!(emulate(&mut p, &lines(texts)));
        p
    }

    fn amd64(texts: &[&str]) -> Amd64Processor {
        let mut p = Amd64Processor::new();
        assert!(emulate(&mut p, &lines(texts)));
        p
    }

    fn binsh_lea(reg: &str, got_reg: &str) -> String {
        format!("lea {},[{}-{:#x}]", reg, got_reg, GOT - BINSH_I386)
    }

    #[test]
    fn execve_with_stack_frame_arguments() {
        let lea = binsh_lea("eax", "ebx");
        let p = i386(&[
            lea.as_str(),
            "mov DWORD PTR [ebp-0x20],eax",
            "mov edx,DWORD PTR [ebp-0x2c]",
            "lea ecx,[ebp-0x28]",
            "push edx",
            "push ecx",
            "push eax",
            "call b8a30 <execve>",
        ], "ebx");
        let image = image();
        let res = Resolver::new(&image).resolve(&p).unwrap();
        assert_eq!(res.constraints, vec![
            "writable: ebp-0x20".to_string(),
            "[ebp-0x28] == NULL || ebp-0x28 == NULL".to_string(),
            "[[ebp-0x2c]] == NULL || [ebp-0x2c] == NULL".to_string(),
        ]);
        assert_eq!(res.effect, "execve(\"/bin/sh\", ebp-0x28, [ebp-0x2c])");
    }

    #[test]
    fn execve_stack_array_argv_and_environ() {
        let p = amd64(&[
            "mov rax,QWORD PTR [rip+0x39bbe4] # 3eaeb0 <environ>",
            "lea rdi,[rip+0x15ba0a] # 1b3e9a <_libc_intl_domainname+0x186>",
            "lea rsi,[rsp+0x40]",
            "mov rdx,QWORD PTR [rax]",
            "call e4c30 <execve>",
        ]);
        let image = image();
        let res = Resolver::new(&image).resolve(&p).unwrap();
        assert_eq!(res.constraints, vec!["[rsp+0x40] == NULL".to_string()]);
        assert_eq!(res.effect, "execve(\"/bin/sh\", rsp+0x40, environ)");
    }

    #[test]
    fn execve_null_arguments_need_nothing() {
        let p = amd64(&[
            "lea rdi,[rip+0x15ba0a] # 1b3e9a",
            "xor esi,esi",
            "xor edx,edx",
            "call e4c30 <execve>",
        ]);
        let image = image();
        let res = Resolver::new(&image).resolve_execve(&p).unwrap();
        assert!(res.constraints.is_empty());
        assert_eq!(res.effect, "execve(\"/bin/sh\", 0, 0)");
    }

    #[test]
    fn execve_stack_slot_written_earlier() {
        let p = amd64(&[
            "mov QWORD PTR [rsp+0x40],r12",
            "lea rdi,[rip+0x15ba0a] # 1b3e9a",
            "lea rsi,[rsp+0x40]",
            "mov rdx,r13",
            "call e4c30 <execve>",
        ]);
        let image = image();
        let res = Resolver::new(&image).resolve(&p).unwrap();
        assert_eq!(res.constraints, vec![
            "r12 == NULL".to_string(),
            "[r13] == NULL || r13 == NULL".to_string(),
        ]);
    }

    #[test]
    fn execve_rejects_global_in_argv_slot() {
        let p = amd64(&[
            "lea rax,[rip+0x15ba0a] # 1b3e9a",
            "mov QWORD PTR [rsp+0x40],rax",
            "mov rdi,rax",
            "lea rsi,[rsp+0x40]",
            "xor edx,edx",
            "call e4c30 <execve>",
        ]);
        let image = image();
        assert_eq!(Resolver::new(&image).resolve(&p), None);
    }

    #[test]
    fn execve_rejects_global_argv_that_is_not_environ() {
        let p = amd64(&[
            "lea rdi,[rip+0x15ba0a] # 1b3e9a",
            "mov rax,QWORD PTR [rip+0x39bbe4] # 3eaeb0",
            "mov rsi,QWORD PTR [rax]",
            "xor edx,edx",
            "call e4c30 <execve>",
        ]);
        let image = image();
        assert_eq!(Resolver::new(&image).resolve(&p), None);
    }

    #[test]
    fn bin_sh_gating() {
        let image = image();
        // a different string
        let p = amd64(&["lea rdi,[rip+0x1] # 0x1000", "xor esi,esi", "xor edx,edx", "call 1 <execve>"]);
        assert_eq!(Resolver::new(&image).resolve(&p), None);
        // "/bin/sh" followed by more bytes before the NUL
        let p = amd64(&["lea rdi,[rip+0x1] # 0x2000", "xor esi,esi", "xor edx,edx", "call 1 <execve>"]);
        assert!(Resolver::new(&image).resolve(&p).is_some());
        // a register, not a known address
        let p = amd64(&["xor esi,esi", "xor edx,edx", "call 1 <execve>"]);
        assert_eq!(Resolver::new(&image).resolve(&p), None);
    }

    #[test]
    fn execl_terminator_register() {
        let lea = binsh_lea("edx", "esi");
        let p = i386(&[lea.as_str(), "push eax", "push edx", "call b8f10 <execl>"], "esi");
        let image = image();
        let res = Resolver::new(&image).resolve(&p).unwrap();
        assert_eq!(res.effect, "execl(\"/bin/sh\", eax)");
        assert!(res.constraints.contains(&"eax == NULL".to_string()));
    }

    #[test]
    fn execl_folds_sh_argument() {
        let lea = binsh_lea("edx", "esi");
        let sh = format!("lea ecx,[esi-{:#x}]", GOT - (BINSH_I386 + 5));
        let p = i386(&[lea.as_str(), sh.as_str(), "push 0x0", "push ecx", "push edx", "call b8f10 <execl>"], "esi");
        let image = image();
        let res = Resolver::new(&image).resolve(&p).unwrap();
        assert_eq!(res.effect, "execl(\"/bin/sh\", \"sh\", 0)");
        assert!(res.constraints.is_empty());
    }

    #[test]
    fn execl_rejects_global_terminator() {
        let lea = binsh_lea("edx", "esi");
        let p = i386(&[lea.as_str(), "push DWORD PTR [esi+0x10]", "push edx", "call b8f10 <execl>"], "esi");
        let image = image();
        assert_eq!(Resolver::new(&image).resolve_execl(&p), None);
    }

    #[test]
    fn posix_spawn_all_arguments() {
        let p = amd64(&[
            "lea rsi,[rip+0x15ba0a] # 1b3e9a",
            "lea rdi,[rsp+0x4]",
            "lea rdx,[rsp+0x50]",
            "mov rcx,rbx",
            "mov r8,r12",
            "mov rax,QWORD PTR [rip+0x39bbe4] # 3eaeb0",
            "mov r9,QWORD PTR [rax]",
            "call e5000 <posix_spawn>",
        ]);
        let image = image();
        let res = Resolver::new(&image).resolve(&p).unwrap();
        assert_eq!(res.constraints, vec![
            "(s32)[rsp+0x54] <= 0".to_string(),
            "rbx == NULL || (u16)[rbx] == NULL".to_string(),
            "[r12] == NULL".to_string(),
        ]);
        assert_eq!(
            res.effect,
            "posix_spawn(rsp+0x4, \"/bin/sh\", rsp+0x50, rbx, r12, environ)"
        );
    }

    #[test]
    fn posix_spawn_pointer_arguments() {
        let p = amd64(&[
            "lea rsi,[rip+0x15ba0a] # 1b3e9a",
            "mov rdi,rbp",
            "mov rdx,r14",
            "xor ecx,ecx",
            "lea r8,[rsp+0x60]",
            "xor r9d,r9d",
            "call e5000 <posix_spawn>",
        ]);
        let image = image();
        let res = Resolver::new(&image).resolve(&p).unwrap();
        assert_eq!(res.constraints, vec![
            "rbp == NULL || writable: rbp".to_string(),
            "r14 == NULL || (s32)[r14+0x4] <= 0".to_string(),
            "[rsp+0x60] == NULL".to_string(),
        ]);
    }

    #[test]
    fn posix_spawn_requires_an_argv() {
        let p = amd64(&[
            "lea rsi,[rip+0x15ba0a] # 1b3e9a",
            "xor edi,edi",
            "xor edx,edx",
            "xor ecx,ecx",
            "xor r8d,r8d",
            "xor r9d,r9d",
            "call e5000 <posix_spawn>",
        ]);
        let image = image();
        assert_eq!(Resolver::new(&image).resolve(&p), None);
    }

    #[test]
    fn posix_spawn_trusts_environ_only_for_envp() {
        let p = amd64(&[
            "lea rsi,[rip+0x15ba0a] # 1b3e9a",
            "xor edi,edi",
            "xor edx,edx",
            "xor ecx,ecx",
            "mov rax,QWORD PTR [rip+0x39bbe4] # 3eaeb0",
            "mov r8,QWORD PTR [rax]",
            "mov r9,QWORD PTR [rax]",
            "call e5000 <posix_spawn>",
        ]);
        let image = image();
        assert_eq!(Resolver::new(&image).resolve(&p), None);
    }

    #[test]
    fn unknown_targets_are_ignored() {
        let p = amd64(&["lea rdi,[rip+0x15ba0a] # 1b3e9a", "call 1234 <system>"]);
        let image = image();
        assert_eq!(Resolver::new(&image).resolve(&p), None);
    }

    #[test]
    fn argv_slot_holding_a_non_null_value_is_rejected() {
        let image = image();
        for store in ["mov QWORD PTR [rsp+0x40],rax", "mov QWORD PTR [rsp+0x40],0x5"] {
            let p = amd64(&[
                "lea rax,[rsp+0x10]",
                store,
                "lea rdi,[rip+0x15ba0a] # 1b3e9a",
                "lea rsi,[rsp+0x40]",
                "xor edx,edx",
                "call e4c30 <execve>",
            ]);
            assert_eq!(Resolver::new(&image).resolve(&p), None, "{}", store);
        }
    }

    #[test]
    fn argv_slot_partly_overwritten_is_rejected() {
        let p = amd64(&[
            "mov QWORD PTR [rsp+0x3c],r12",
            "lea rdi,[rip+0x15ba0a] # 1b3e9a",
            "lea rsi,[rsp+0x40]",
            "xor edx,edx",
            "call e4c30 <execve>",
        ]);
        let image = image();
        assert_eq!(Resolver::new(&image).resolve(&p), None);
    }

    fn spawn_with_stack_structs(stores: &[&str]) -> Option<Resolution> {
        let mut texts = stores.to_vec();
        texts.extend([
            "lea rsi,[rip+0x15ba0a] # 1b3e9a",
            "xor edi,edi",
            "lea rdx,[rsp+0x50]",
            "lea rcx,[rsp+0x60]",
            "mov r8,rbx",
            "xor r9d,r9d",
            "call e5000 <posix_spawn>",
        ]);
        let p = amd64(&texts);
        let image = image();
        Resolver::new(&image).resolve(&p)
    }

    #[test]
    fn posix_spawn_reads_struct_fields_written_before_the_call() {
        let res = spawn_with_stack_structs(&[
            "mov QWORD PTR [rsp+0x54],r12",
            "mov QWORD PTR [rsp+0x60],r13",
        ])
        .unwrap();
        assert_eq!(res.constraints, vec![
            "(s32)r12 <= 0".to_string(),
            "(u16)r13 == NULL".to_string(),
            "[rbx] == NULL".to_string(),
        ]);

        let res = spawn_with_stack_structs(&[
            "mov QWORD PTR [rsp+0x54],0x0",
            "mov QWORD PTR [rsp+0x60],0x0",
        ])
        .unwrap();
        assert_eq!(res.constraints, vec!["[rbx] == NULL".to_string()]);

        let res = spawn_with_stack_structs(&["mov QWORD PTR [rsp+0x54],0xffffffffffffffff"]).unwrap();
        assert_eq!(res.constraints, vec![
            "(u16)[rsp+0x60] == NULL".to_string(),
            "[rbx] == NULL".to_string(),
        ]);
    }

    #[test]
    fn posix_spawn_rejects_unsatisfiable_struct_fields() {
        assert_eq!(spawn_with_stack_structs(&["mov QWORD PTR [rsp+0x54],0x1"]), None);
        assert_eq!(spawn_with_stack_structs(&["mov QWORD PTR [rsp+0x60],0x1"]), None);
        // the word at +0x50 covers __used at +0x54 only in part
        assert_eq!(spawn_with_stack_structs(&["mov QWORD PTR [rsp+0x50],r12"]), None);
        assert_eq!(
            spawn_with_stack_structs(&[
                "mov rax,QWORD PTR [rip+0x39bbe4] # 3eaeb0",
                "mov QWORD PTR [rsp+0x60],rax",
            ]),
            None
        );
    }

    #[test]
    fn duplicate_constraints_collapse() {
        let res = Resolution::new(
            vec!["a == NULL".into(), "b == NULL".into(), "a == NULL".into()],
            "x".into(),
        );
        assert_eq!(res.constraints, vec!["a == NULL".to_string(), "b == NULL".to_string()]);
    }
}

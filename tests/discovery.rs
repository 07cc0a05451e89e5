use oneshot::config::Config;
use oneshot::disasm::parse_objdump;
use oneshot::one_gadget::{find_gadgets, Target};
use oneshot::strings::RawImage;
use oneshot::types::Arch;

const LIBC64: &str = "
/lib/x86_64-linux-gnu/libc.so.6:     file format elf64-x86-64


Disassembly of section .text:

000000000004f2a0 <do_system>:
   4f2a0:\tpush   r12
   4f2a2:\tpush   rbp
   4f2a3:\tpush   rbx
   4f2a4:\tsub    rsp,0x180
   4f2ab:\tjmp    4f320 <do_system+0x80>
   4f2b0:\tmov    QWORD PTR [rsp+0x8],0x1
   4f2b9:\tmov    rax,QWORD PTR [rip+0x39bbf0]        # 3eaeb0 <environ>
   4f2c0:\tlea    rdi,[rip+0x164bd4]        # 1b3e9a <_libc_intl_domainname+0x186>
   4f2c7:\tlea    rsi,[rsp+0x40]
   4f2cc:\tmov    rdx,QWORD PTR [rax]
   4f2cf:\tcall   e4c30 <execve>
   4f2d4:\tmov    edi,eax

00000000000e4c30 <execve>:
   e4c30:\tmov    eax,0x3b
   e4c35:\tsyscall

000000000010a2fc <posix_spawn_helper>:
   10a2fc:\tmov    rax,QWORD PTR [rip+0x2e0bad]        # 3eaeb0 <environ>
   10a303:\tlea    rsi,[rip+0xa9b90]        # 1b3e9a <_libc_intl_domainname+0x186>
   10a30a:\tlea    rdi,[rsp+0x4]
   10a30f:\txor    edx,edx
   10a311:\txor    ecx,ecx
   10a313:\tlea    r8,[rsp+0x50]
   10a318:\tmov    r9,QWORD PTR [rax]
   10a31b:\tcall   e5000 <posix_spawn>
   10a320:\tcall   e5100 <system>
";

const LIBC32: &str = "
/lib/i386-linux-gnu/libc.so.6:     file format elf32-i386


Disassembly of section .text:

0003ac40 <do_system>:
   3ac40:\tpush   ebp
   3ac5c:\tmov    eax,DWORD PTR [esi-0xb8]
   3ac62:\tlea    edx,[esi-0x5c731]
   3ac68:\tmov    DWORD PTR [ebp-0x20],edx
   3ac6b:\tmov    ecx,DWORD PTR [ebp-0x2c]
   3ac6e:\tlea    eax,[ebp-0x28]
   3ac71:\tpush   ecx
   3ac72:\tpush   eax
   3ac73:\tpush   edx
   3ac74:\tcall   b8a30 <execve>
";

const GOT32: u64 = 0x1d8000;

fn libc64() -> RawImage {
    let mut image = RawImage::new(Vec::new());
    image.place(0x1b3e9a, b"/bin/sh\0");
    image
}

fn libc32() -> RawImage {
    let mut image = RawImage::new(Vec::new());
    image.place((GOT32 - 0x5c731) as usize, b"/bin/sh\0");
    image
}

#[test]
fn amd64_execve_and_posix_spawn() {
    let image = libc64();
    let target = Target { arch: Arch::Amd64, lookup: &image, got_base: None, name: "libc.so.6" };
    let blocks = parse_objdump(LIBC64);
    let gadgets = find_gadgets(&target, &blocks, &Config::default()).unwrap();

    let rendered: Vec<String> = gadgets.iter().map(|g| g.to_string()).collect();
    // Nothing in front of the jmp survives trimming.
    assert!(gadgets.iter().all(|g| g.offset >= 0x4f2b0));

    let execve = gadgets.iter().find(|g| g.offset == 0x4f2b9).unwrap();
    assert_eq!(execve.effect, "execve(\"/bin/sh\", rsp+0x40, environ)");
    assert_eq!(execve.constraints, vec!["[rsp+0x40] == NULL".to_string()]);

    // The store to [rsp+0x8] is unrelated but still replayed.
    let earlier = gadgets.iter().find(|g| g.offset == 0x4f2b0).unwrap();
    assert_eq!(earlier.constraints, execve.constraints);

    let spawn = gadgets.iter().find(|g| g.offset == 0x10a2fc).unwrap();
    assert_eq!(
        spawn.effect,
        "posix_spawn(rsp+0x4, \"/bin/sh\", 0, 0, rsp+0x50, environ)"
    );
    assert_eq!(spawn.constraints, vec!["[rsp+0x50] == NULL".to_string()]);

    assert!(rendered.iter().all(|r| !r.contains("system")));
}

#[test]
fn i386_execve_through_the_got() {
    let image = libc32();
    let target = Target { arch: Arch::I386, lookup: &image, got_base: Some(GOT32), name: "libc.so.6" };
    let blocks = parse_objdump(LIBC32);
    let gadgets = find_gadgets(&target, &blocks, &Config::default()).unwrap();

    let gadget = gadgets.iter().find(|g| g.offset == 0x3ac62).unwrap();
    assert_eq!(gadget.effect, "execve(\"/bin/sh\", ebp-0x28, [ebp-0x2c])");
    assert_eq!(gadget.constraints, vec![
        "esi is the GOT address of libc".to_string(),
        "writable: ebp-0x20".to_string(),
        "[ebp-0x28] == NULL || ebp-0x28 == NULL".to_string(),
        "[[ebp-0x2c]] == NULL || [ebp-0x2c] == NULL".to_string(),
    ]);

    // Starting after the lea leaves edx unknown.
    assert!(gadgets.iter().all(|g| g.offset <= 0x3ac62));
}

#[test]
fn lookback_limits_entry_points() {
    let image = libc64();
    let target = Target { arch: Arch::Amd64, lookup: &image, got_base: None, name: "libc.so.6" };
    let blocks = parse_objdump(LIBC64);
    let config = Config::default().with_lookback(3);
    let gadgets = find_gadgets(&target, &blocks, &config).unwrap();
    assert!(gadgets.iter().all(|g| g.offset >= 0x4f2c0));
    assert!(gadgets.iter().any(|g| g.offset == 0x4f2c0));
}

#[test]
fn wrong_library_is_rejected() {
    let image = RawImage::new(b"not a libc\0".to_vec());
    let target = Target { arch: Arch::Amd64, lookup: &image, got_base: None, name: "libfoo.so" };
    let err = find_gadgets(&target, &parse_objdump(LIBC64), &Config::default()).unwrap_err();
    assert!(err.to_string().contains("libfoo.so"));
}

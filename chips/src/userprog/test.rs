// Process lifecycle and system call tests
use super::*;
use crate::{
    config::KernelConfig, logger, machine::processor::PAGE_SIZE, machine::HaltReason,
    test::boot_with, threads, Kernel, KernelError,
};
use alloc::{string::String, sync::Arc, vec, vec::Vec};
use chips_abi::{Pid, Syscall};
use core::sync::atomic::{AtomicBool, Ordering};
use log::LevelFilter;
use spin::Mutex;

type Record = Arc<Mutex<Vec<i32>>>;

// Syscalls can switch threads, so never make them while holding the lock
fn note(record: &Record, values: impl IntoIterator<Item = i32>) {
    record.lock().extend(values);
}

fn boot() -> Arc<Kernel> {
    boot_with(KernelConfig::default())
}

fn program(body: impl Fn(&mut UserContext<'_>) + Send + Sync + 'static) -> Image {
    Image::new(body).with_section(Section::new(".text", 0, true, vec![0x0c; 64]))
}

// Somewhere to put syscall arguments, well clear of anything in use
fn scratch(ctx: &UserContext<'_>) -> u32 {
    ctx.stack_pointer() - 0x200
}

fn exec(ctx: &mut UserContext<'_>, name: &str) -> i32 {
    let addr = scratch(ctx);
    ctx.write_string(addr, name);
    ctx.syscall(Syscall::Exec, [addr as i32, 0, 0, 0])
}

fn join(ctx: &mut UserContext<'_>, pid: i32, status_addr: u32) -> i32 {
    ctx.syscall(Syscall::Join, [pid, status_addr as i32, 0, 0])
}

fn halt(ctx: &mut UserContext<'_>) {
    ctx.syscall(Syscall::Halt, [0; 4]);
    unreachable!("Halt returned to the root process");
}

#[test]
fn exit_status_reaches_parent() {
    let kernel = boot();
    let record = Record::default();

    kernel.install(
        "child.coff",
        program(|ctx| {
            ctx.syscall(Syscall::Exit, [42, 0, 0, 0]);
            unreachable!("Exit returned");
        }),
    );
    kernel.install("parent.coff", {
        let record = record.clone();
        program(move |ctx| {
            let pid = exec(ctx, "child.coff");
            let status_addr = scratch(ctx) + 0x100;
            let joined = join(ctx, pid, status_addr);
            let status = ctx.read_word(status_addr);
            note(&record, [pid, joined, status]);
            // Already detached
            note(&record, [join(ctx, pid, status_addr)]);
            halt(ctx);
        })
    });

    assert_eq!(kernel.run("parent.coff", &[]).unwrap(), HaltReason::Halt);
    assert_eq!(*record.lock(), [1, 1, 42, -1]);

    // Only the root's text, stack and argument pages are still taken
    assert_eq!(kernel.processes().pids(), [Pid::ROOT]);
    assert_eq!(kernel.frames().num_free(), 64 - (1 + 8 + 1));
}

#[test]
fn join_rejects_non_children() {
    let kernel = boot();
    let record = Record::default();

    kernel.install("root.coff", {
        let record = record.clone();
        program(move |ctx| {
            let status_addr = scratch(ctx);
            note(&record, [
                join(ctx, 7, status_addr),
                join(ctx, -1, status_addr),
                join(ctx, 0, status_addr),
            ]);
            halt(ctx);
        })
    });

    assert_eq!(kernel.run("root.coff", &[]).unwrap(), HaltReason::Halt);
    assert_eq!(*record.lock(), [-1, -1, -1]);
}

#[test]
fn crashed_child_has_no_status() {
    let kernel = boot();
    let record = Record::default();

    kernel.install("crash.coff", program(|_| {}));
    kernel.install("root.coff", {
        let record = record.clone();
        program(move |ctx| {
            let status_addr = scratch(ctx) + 0x100;
            ctx.write_word(status_addr, 0x5a5a);
            let pid = exec(ctx, "crash.coff");
            note(&record, [join(ctx, pid, status_addr)]);
            note(&record, [ctx.read_word(status_addr)]);
            halt(ctx);
        })
    });

    assert_eq!(kernel.run("root.coff", &[]).unwrap(), HaltReason::Halt);
    assert_eq!(*record.lock(), [0, 0x5a5a]);
    assert_eq!(kernel.processes().len(), 1);
}

#[test]
fn failed_exec_leaves_nothing_behind() {
    let kernel = boot();
    let record = Record::default();

    kernel.install("child.elf", program(|_| {}));
    kernel.install(
        "broken.coff",
        Image::new(|_| {}).with_section(Section::zeroed(".text", 1, 1, true)),
    );
    kernel.install("root.coff", {
        let record = record.clone();
        program(move |ctx| {
            note(&record, [
                exec(ctx, "child.elf"),
                exec(ctx, "missing.coff"),
                exec(ctx, "broken.coff"),
                ctx.syscall(Syscall::Exec, [-4, 0, 0, 0]),
                ctx.syscall(Syscall::Exec, [scratch(ctx) as i32, -1, 0, 0]),
            ]);
            // Argument pointer to unmapped memory
            let addr = scratch(ctx);
            ctx.write_string(addr, "child.coff");
            ctx.write_word(addr + 0x40, 0x7fff_0000);
            let argv = addr as i32 + 0x40;
            note(&record, [ctx.syscall(Syscall::Exec, [addr as i32, 1, argv, 0])]);
            halt(ctx);
        })
    });

    assert_eq!(kernel.run("root.coff", &[]).unwrap(), HaltReason::Halt);
    assert_eq!(*record.lock(), [-1; 6]);

    let root = kernel.processes().get(Pid::ROOT).unwrap();
    assert!(root.children().is_empty());
    assert_eq!(kernel.processes().len(), 1);
    assert_eq!(kernel.frames().num_free(), 64 - root.num_pages());
}

#[test]
fn arguments_reach_the_child() {
    let kernel = boot();
    let seen = Arc::new(Mutex::new(Vec::new()));

    kernel.install("echo.coff", {
        let seen = seen.clone();
        program(move |ctx| {
            seen.lock().push(ctx.args());
            ctx.syscall(Syscall::Exit, [0; 4]);
        })
    });
    kernel.install(
        "shell.coff",
        program(|ctx| {
            let base = scratch(ctx);
            let args = ["echo.coff", "hello", "world"];
            let argv = base + 0x100;
            let mut string_addr = base + 0x20;
            for (index, arg) in args.iter().enumerate() {
                ctx.write_word(argv + 4 * index as u32, string_addr as i32);
                ctx.write_string(string_addr, arg);
                string_addr += arg.len() as u32 + 1;
            }
            ctx.write_string(base, "echo.coff");

            let pid = ctx.syscall(Syscall::Exec, [base as i32, 3, argv as i32, 0]);
            assert_eq!(join(ctx, pid, base), 1);
            ctx.syscall(Syscall::Exit, [0; 4]);
        }),
    );

    let args = [String::from("shell.coff"), String::from("-v")];
    kernel.install("outer.coff", {
        let seen = seen.clone();
        program(move |ctx| {
            seen.lock().push(ctx.args());
            let pid = exec(ctx, "shell.coff");
            join(ctx, pid, scratch(ctx));
            halt(ctx);
        })
    });

    assert_eq!(kernel.run("outer.coff", &args).unwrap(), HaltReason::Halt);
    assert_eq!(
        *seen.lock(),
        [vec!["shell.coff", "-v"], vec!["echo.coff", "hello", "world"]]
    );
}

#[test]
fn console_io() {
    let kernel = boot();
    let record = Record::default();
    kernel.console().push_input(b"abc");

    kernel.install("io.coff", {
        let record = record.clone();
        program(move |ctx| {
            let base = scratch(ctx);
            ctx.write_string(base, "hello");
            let write = |ctx: &mut UserContext<'_>, fd, size| {
                ctx.syscall(Syscall::Write, [fd, base as i32, size, 0])
            };
            note(&record, [
                write(ctx, 1, 5),
                write(ctx, 0, 5),
                write(ctx, 5, 5),
                write(ctx, -1, 5),
                write(ctx, 1, -1),
            ]);

            let buffer = base + 0x40;
            let read = ctx.syscall(Syscall::Read, [0, buffer as i32, 16, 0]);
            note(&record, [read]);
            let mut bytes = [0; 3];
            ctx.read_bytes(buffer, &mut bytes);
            note(&record, [i32::from(bytes == *b"abc")]);
            // Nothing left
            note(&record, [ctx.syscall(Syscall::Read, [0, buffer as i32, 16, 0])]);
            // Unmapped buffers transfer nothing
            note(&record, [
                ctx.syscall(Syscall::Write, [1, -4, 5, 0]),
                ctx.syscall(Syscall::Read, [0, -4, 16, 0]),
            ]);
            halt(ctx);
        })
    });

    assert_eq!(kernel.run("io.coff", &[]).unwrap(), HaltReason::Halt);
    assert_eq!(*record.lock(), [5, -1, -1, -1, -1, 3, 1, 0, 0, 0]);
    assert_eq!(kernel.console().output(), b"hello");
}

#[test]
fn file_syscalls() {
    logger::init(LevelFilter::Warn);
    let file_system = Arc::new(MemoryFileSystem::new());
    let kernel = Kernel::boot_with_file_system(KernelConfig::default(), file_system.clone());
    let record = Record::default();

    kernel.install("files.coff", {
        let record = record.clone();
        program(move |ctx| {
            let name = scratch(ctx);
            let data = name + 0x40;
            let name_of = |ctx: &mut UserContext<'_>, file: &str| {
                ctx.write_string(name, file);
                name as i32
            };

            let missing = name_of(ctx, "notes.txt");
            note(&record, [ctx.syscall(Syscall::Open, [missing, 0, 0, 0])]);

            let notes = ctx.syscall(Syscall::Create, [name as i32, 0, 0, 0]);
            ctx.write_string(data, "data");
            note(&record, [
                notes,
                ctx.syscall(Syscall::Write, [notes, data as i32, 4, 0]),
                ctx.syscall(Syscall::Close, [notes, 0, 0, 0]),
                ctx.syscall(Syscall::Close, [notes, 0, 0, 0]),
            ]);

            let notes = ctx.syscall(Syscall::Open, [name as i32, 0, 0, 0]);
            let read = ctx.syscall(Syscall::Read, [notes, data as i32 + 8, 16, 0]);
            let contents = ctx.read_string(data + 8);
            note(&record, [notes, read, i32::from(contents.starts_with("data"))]);

            let keep = name_of(ctx, "keep.txt");
            let kept = ctx.syscall(Syscall::Create, [keep, 0, 0, 0]);
            ctx.syscall(Syscall::Write, [kept, data as i32, 4, 0]);

            let notes_name = name_of(ctx, "notes.txt");
            note(&record, [
                ctx.syscall(Syscall::Unlink, [notes_name, 0, 0, 0]),
                ctx.syscall(Syscall::Unlink, [notes_name, 0, 0, 0]),
            ]);
            halt(ctx);
        })
    });

    assert_eq!(kernel.run("files.coff", &[]).unwrap(), HaltReason::Halt);
    assert_eq!(*record.lock(), [-1, 2, 4, 0, -1, 2, 4, 1, 0, -1]);
    assert!(file_system.contents("notes.txt").is_none());
    assert_eq!(file_system.contents("keep.txt").unwrap(), b"data");
}

#[test]
fn file_table_fills_up() {
    let kernel = boot_with(KernelConfig {
        max_open_files: 4,
        ..KernelConfig::default()
    });
    let record = Record::default();

    kernel.install("files.coff", {
        let record = record.clone();
        program(move |ctx| {
            let name = scratch(ctx);
            ctx.write_string(name, "scratch.txt");
            for _ in 0..3 {
                let fd = ctx.syscall(Syscall::Create, [name as i32, 0, 0, 0]);
                note(&record, [fd]);
            }
            halt(ctx);
        })
    });

    assert_eq!(kernel.run("files.coff", &[]).unwrap(), HaltReason::Halt);
    assert_eq!(*record.lock(), [2, 3, -1]);
}

#[test]
fn only_root_may_halt() {
    let kernel = boot();
    let record = Record::default();

    kernel.install("child.coff", {
        let record = record.clone();
        program(move |ctx| {
            note(&record, [ctx.syscall(Syscall::Halt, [0; 4])]);
            ctx.syscall(Syscall::Exit, [0; 4]);
        })
    });
    kernel.install(
        "root.coff",
        program(|ctx| {
            let pid = exec(ctx, "child.coff");
            join(ctx, pid, scratch(ctx));
            halt(ctx);
        }),
    );

    assert_eq!(kernel.run("root.coff", &[]).unwrap(), HaltReason::Halt);
    assert_eq!(*record.lock(), [0]);
}

#[test]
fn root_exit_and_crash_stop_the_machine() {
    let kernel = boot();
    kernel.install(
        "exit.coff",
        program(|ctx| {
            ctx.syscall(Syscall::Exit, [3, 0, 0, 0]);
        }),
    );
    assert_eq!(kernel.run("exit.coff", &[]).unwrap(), HaltReason::Exit(3));

    let kernel = boot();
    kernel.install("crash.coff", program(|_| {}));
    assert_eq!(kernel.run("crash.coff", &[]).unwrap(), HaltReason::Crash);
    assert_eq!(kernel.frames().num_free(), 64);
    assert!(kernel.processes().is_empty());
}

#[test]
fn unknown_syscall_is_fatal() {
    let kernel = boot();
    kernel.install(
        "bad.coff",
        program(|ctx| {
            ctx.syscall_raw(42, [0; 4]);
        }),
    );

    let HaltReason::Panic(message) = kernel.run("bad.coff", &[]).unwrap() else {
        panic!("Expected a kernel panic");
    };
    assert!(message.contains("Unknown system call 42"), "{message}");
}

#[test]
fn user_faults_are_fatal() {
    let kernel = boot();
    kernel.install(
        "fault.coff",
        program(|ctx| {
            // Text is read-only
            ctx.write_word(0, 1);
        }),
    );

    let HaltReason::Panic(message) = kernel.run("fault.coff", &[]).unwrap() else {
        panic!("Expected a kernel panic");
    };
    assert!(message.contains("Unexpected exception"), "{message}");
}

#[test]
fn orphans_clean_up_after_themselves() {
    let kernel = boot();
    let record = Record::default();

    kernel.install(
        "sleepy.coff",
        program(|ctx| {
            threads::current_kernel().alarm().wait_until(1000);
            ctx.syscall(Syscall::Exit, [7, 0, 0, 0]);
        }),
    );
    kernel.install(
        "middle.coff",
        program(|ctx| {
            exec(ctx, "sleepy.coff");
            ctx.syscall(Syscall::Exit, [5, 0, 0, 0]);
        }),
    );
    kernel.install("root.coff", {
        let record = record.clone();
        program(move |ctx| {
            let kernel = threads::current_kernel();
            let status_addr = scratch(ctx) + 0x100;
            let middle = exec(ctx, "middle.coff");
            note(&record, [join(ctx, middle, status_addr)]);
            note(&record, [ctx.read_word(status_addr)]);

            // Not reparented to us
            let sleepy = kernel.processes().get(Pid::new(2)).unwrap();
            assert_eq!(sleepy.parent(), None);
            note(&record, [join(ctx, 2, status_addr)]);

            kernel.alarm().wait_until(3000);
            note(&record, [i32::from(kernel.processes().contains(Pid::new(2)))]);
            halt(ctx);
        })
    });

    assert_eq!(kernel.run("root.coff", &[]).unwrap(), HaltReason::Halt);
    assert_eq!(*record.lock(), [1, 5, -1, 0]);
    assert_eq!(kernel.processes().pids(), [Pid::ROOT]);
}

#[test]
fn parent_exiting_during_child_exit() {
    // Slide the child's exit across a timer period so that, for some delay, the parent exits
    // while the child is still recording its status
    for delay in 0..520 {
        let kernel = boot();
        let exiting = Arc::new(AtomicBool::new(false));

        kernel.install("child.coff", {
            let exiting = exiting.clone();
            program(move |ctx| {
                for _ in 0..delay {
                    ctx.syscall(Syscall::Halt, [0; 4]);
                }
                exiting.store(true, Ordering::SeqCst);
                ctx.syscall(Syscall::Exit, [9, 0, 0, 0]);
            })
        });
        kernel.install("parent.coff", {
            let exiting = exiting.clone();
            program(move |ctx| {
                exec(ctx, "child.coff");
                while !exiting.load(Ordering::SeqCst) {
                    ctx.syscall(Syscall::Halt, [0; 4]);
                }
                ctx.syscall(Syscall::Exit, [1, 0, 0, 0]);
            })
        });
        kernel.install(
            "root.coff",
            program(|ctx| {
                let pid = exec(ctx, "parent.coff");
                join(ctx, pid, scratch(ctx));
                threads::current_kernel().alarm().wait_until(5000);
                halt(ctx);
            }),
        );

        assert_eq!(kernel.run("root.coff", &[]).unwrap(), HaltReason::Halt);
        assert_eq!(kernel.processes().pids(), [Pid::ROOT], "delay {delay}");
    }
}

#[test]
fn loader_layout() {
    let kernel = boot();
    kernel.install(
        "layout.coff",
        Image::new(|_| {})
            .with_section(Section::new(".text", 0, true, vec![0xab; PAGE_SIZE + 1]))
            .with_section(Section::new(".data", 2, false, b"xyz".to_vec()))
            .with_entry_point(0x10),
    );

    let process = kernel.new_process();
    let args = [String::from("a"), String::from("bc")];
    process.execute(&kernel, "layout.coff", &args).unwrap();
    assert_eq!(process.state(), ProcessState::Running);
    assert_eq!(process.num_pages(), 3 + 8 + 1);
    assert_eq!(process.open_files(), 2);

    let start = process.start();
    let argv = 11 * PAGE_SIZE as u32;
    assert_eq!(
        start,
        ProgramStart {
            pc: 0x10,
            sp: 11 * PAGE_SIZE as u32,
            argc: 2,
            argv,
        }
    );

    let mut word = [0; 4];
    assert_eq!(process.read_virtual_memory(&kernel, argv as i32 + 4, &mut word), 4);
    let pointer = i32::from_le_bytes(word);
    assert_eq!(pointer, argv as i32 + 8 + 2);
    assert_eq!(
        process.read_virtual_memory_string(&kernel, pointer, 16).unwrap(),
        "bc"
    );

    let mut bytes = [0; 3];
    process.read_virtual_memory(&kernel, PAGE_SIZE as i32, &mut bytes);
    assert_eq!(bytes, [0xab, 0, 0]);
    process.read_virtual_memory(&kernel, 2 * PAGE_SIZE as i32, &mut bytes);
    assert_eq!(&bytes, b"xyz");
    // Text can't be written
    assert_eq!(process.write_virtual_memory(&kernel, 0, &[1]), 0);

    assert_eq!(kernel.wait_for_halt(), HaltReason::Crash);
    assert_eq!(process.state(), ProcessState::Exited);
    assert_eq!(process.open_files(), 0);
}

#[test]
fn load_failures_release_everything() {
    let kernel = boot_with(KernelConfig {
        num_phys_pages: 16,
        ..KernelConfig::default()
    });
    kernel.install(
        "fragmented.coff",
        Image::new(|_| {})
            .with_section(Section::zeroed(".text", 0, 1, true))
            .with_section(Section::zeroed(".data", 2, 1, false)),
    );
    kernel.install(
        "huge.coff",
        Image::new(|_| {}).with_section(Section::zeroed(".text", 0, 8, true)),
    );
    kernel.install(
        "small.coff",
        Image::new(|_| {}).with_section(Section::zeroed(".text", 0, 2, true)),
    );

    let expect_failure = |name: &str, args: &[String], check: fn(&KernelError) -> bool| {
        let process = kernel.new_process();
        let error = process.execute(&kernel, name, args).unwrap_err();
        assert!(check(&error), "{name}: {error}");
        assert_eq!(process.state(), ProcessState::Exited);
        assert_eq!(process.open_files(), 0);
        assert!(!kernel.processes().contains(process.pid()));
    };

    expect_failure("missing.coff", &[], |error| {
        matches!(error, KernelError::NoSuchExecutable(_))
    });
    expect_failure("fragmented.coff", &[], |error| {
        matches!(error, KernelError::FragmentedExecutable)
    });
    expect_failure("huge.coff", &[], |error| matches!(error, KernelError::OutOfMemory));
    expect_failure("small.coff", &[String::from_utf8(vec![b'x'; PAGE_SIZE]).unwrap()], |error| {
        matches!(error, KernelError::ArgumentsTooLong)
    });
    assert_eq!(kernel.frames().num_free(), 16);

    // Fits the machine, but somebody else is holding frames
    let held: Vec<_> = (0..8).map(|_| kernel.frames().new_page().unwrap()).collect();
    expect_failure("small.coff", &[], |error| matches!(error, KernelError::OutOfMemory));
    assert_eq!(kernel.frames().num_free(), 8);
    for ppn in held {
        kernel.frames().delete_page(ppn);
    }
    assert_eq!(kernel.frames().num_free(), 16);
}

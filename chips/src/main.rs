//! Chips demo: boot a kernel, exercise the thread primitives, then run a small process tree
use anyhow::{bail, Context, Result};
use chips::{
    config::KernelConfig,
    logger,
    machine::HaltReason,
    threads::{self, Communicator, Condition2, Lock},
    userprog::{Image, Section, UserContext},
    Kernel,
};
use chips_abi::{FileDescriptor, Syscall};
use log::info;
use owo_colors::OwoColorize;
use spin::Mutex;
use std::{env, fs, sync::Arc};

fn main() -> Result<()> {
    let config = match env::args().nth(1) {
        Some(path) => {
            let text =
                fs::read_to_string(&path).with_context(|| format!("Could not read {path}"))?;
            KernelConfig::parse(&text).with_context(|| format!("Bad config file {path}"))?
        }
        None => KernelConfig::default(),
    };
    logger::init(config.log_level);

    println!("{}", "Welcome to Chips!!!".cyan().bold());
    let kernel = Kernel::boot(config);

    alarm_test(&kernel)?;
    condition_test()?;
    communicator_test()?;
    println!("{}", "Thread tests passed".green());

    install_programs(&kernel);
    kernel.console().set_echo(true);
    let reason = kernel.run("shell.coff", &[String::from("shell.coff")])?;
    println!("{} {reason}", "Machine stopped:".bold());
    if reason != HaltReason::Halt {
        bail!("Shell did not halt cleanly");
    }
    Ok(())
}

fn alarm_test(kernel: &Arc<Kernel>) -> Result<()> {
    let delays = [1700, 300, 900];
    let sleepers = delays
        .into_iter()
        .map(|delay| {
            threads::fork("sleeper", move || {
                let kernel = threads::current_kernel();
                let start = kernel.time();
                kernel.alarm().wait_until(delay);
                info!("Slept {delay} ticks, woke after {}", kernel.time() - start);
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let start = kernel.time();
    for sleeper in &sleepers {
        sleeper.join();
    }
    if kernel.time() < start + 1700 {
        bail!("Sleepers woke early");
    }
    Ok(())
}

fn condition_test() -> Result<()> {
    let lock = Arc::new(Lock::new());
    let ready = Arc::new(Condition2::new(lock.clone()));
    let count = Arc::new(Mutex::new(0));

    let waiters = (0..3)
        .map(|_| {
            let (lock, ready, count) = (lock.clone(), ready.clone(), count.clone());
            threads::fork("waiter", move || {
                lock.acquire();
                while *count.lock() == 0 {
                    ready.sleep();
                }
                *count.lock() += 1;
                lock.release();
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    while ready.waiters() < 3 {
        threads::yield_now();
    }
    lock.acquire();
    *count.lock() = 1;
    ready.wake_all();
    lock.release();

    for waiter in &waiters {
        waiter.join();
    }
    if *count.lock() != 4 {
        bail!("Not every waiter woke");
    }
    Ok(())
}

fn communicator_test() -> Result<()> {
    let communicator = Arc::new(Communicator::new());
    let heard = Arc::new(Mutex::new(Vec::new()));

    let mut parties = Vec::new();
    for word in 0..4 {
        let communicator = communicator.clone();
        parties.push(threads::fork("speaker", move || communicator.speak(word))?);
    }
    for _ in 0..4 {
        let (communicator, heard) = (communicator.clone(), heard.clone());
        parties.push(threads::fork("listener", move || {
            let word = communicator.listen();
            heard.lock().push(word);
        })?);
    }
    for party in &parties {
        party.join();
    }

    let mut heard = heard.lock().clone();
    heard.sort_unstable();
    if heard != [0, 1, 2, 3] {
        bail!("Heard {heard:?}");
    }
    Ok(())
}

fn text() -> Section {
    Section::new(".text", 0, true, vec![0; 256])
}

fn print(ctx: &mut UserContext<'_>, message: &str) {
    let addr = ctx.stack_pointer() - 0x400;
    ctx.write_string(addr, message);
    ctx.syscall(
        Syscall::Write,
        [
            FileDescriptor::STDOUT.into(),
            addr as i32,
            message.len() as i32,
            0,
        ],
    );
}

fn install_programs(kernel: &Kernel) {
    kernel.install(
        "echo.coff",
        Image::new(|ctx| {
            let line = ctx.args()[1..].join(" ");
            print(ctx, &format!("{line}\n"));
            ctx.syscall(Syscall::Exit, [0; 4]);
        })
        .with_section(text()),
    );

    kernel.install(
        "shell.coff",
        Image::new(|ctx| {
            let base = ctx.stack_pointer() - 0x200;
            let args = ["echo.coff", "hello", "from", "chips"];
            let argv = base + 0x100;
            let mut string_addr = base;
            for (index, arg) in args.iter().enumerate() {
                ctx.write_word(argv + 4 * index as u32, string_addr as i32);
                ctx.write_string(string_addr, arg);
                string_addr += arg.len() as u32 + 1;
            }

            let pid = ctx.syscall(Syscall::Exec, [base as i32, args.len() as i32, argv as i32, 0]);
            let status_addr = base + 0x180;
            let joined = ctx.syscall(Syscall::Join, [pid, status_addr as i32, 0, 0]);
            let status = ctx.read_word(status_addr);
            print(ctx, &format!("echo (pid {pid}) joined {joined}, status {status}\n"));
            ctx.syscall(Syscall::Halt, [0; 4]);
        })
        .with_section(text()),
    );
}

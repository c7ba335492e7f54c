//! Fork isolation and the privilege sandbox, exercised from outside the crate.

use std::path::Path;

use udfbox::exec::{spawn_isolated, PrivilegeSandbox, Sandbox, SharedMemoryChannel, Unconfined};
use udfbox::kernel::capabilities::check_no_new_privs;
use udfbox::kernel::limits::ResourceLimits;
use udfbox::{Result, UdfError};

fn write_u64(channel: &SharedMemoryChannel, index: usize, value: u64) {
    assert!((index + 1) * 8 <= channel.len());
    unsafe { (channel.as_mut_ptr() as *mut u64).add(index).write_unaligned(value) };
}

fn read_u64(bytes: &[u8], index: usize) -> u64 {
    u64::from_ne_bytes(bytes[index * 8..index * 8 + 8].try_into().unwrap())
}

#[test]
fn privilege_sandbox_applies_limits_in_the_child_only() {
    let sandbox = PrivilegeSandbox::new(
        ResourceLimits {
            cpu_time_secs: Some(30),
            memory_bytes: None,
            file_size_bytes: Some(1024 * 1024),
        },
        false,
    );
    let channel = SharedMemoryChannel::new(24).unwrap();
    let mut dest = [0u8; 24];

    spawn_isolated(&sandbox, Path::new("/srv/udf"), &channel, &mut dest, || {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        unsafe { libc::getrlimit(libc::RLIMIT_FSIZE, &mut limit) };
        write_u64(&channel, 0, limit.rlim_cur as u64);
        unsafe { libc::getrlimit(libc::RLIMIT_CORE, &mut limit) };
        write_u64(&channel, 1, limit.rlim_cur as u64);
        write_u64(&channel, 2, check_no_new_privs()? as u64);
        Ok(())
    })
    .unwrap();

    assert_eq!(read_u64(&dest, 0), 1024 * 1024);
    assert_eq!(read_u64(&dest, 1), 0);
    assert_eq!(read_u64(&dest, 2), 1);

    let mut parent = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    unsafe { libc::getrlimit(libc::RLIMIT_FSIZE, &mut parent) };
    assert_ne!(parent.rlim_cur as u64, 1024 * 1024);
}

struct RecordingSandbox;

impl Sandbox for RecordingSandbox {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn enter(&self, sandbox_path: &Path) -> Result<()> {
        if sandbox_path == Path::new("/refuse") {
            return Err(UdfError::Sandbox("refused".to_string()));
        }
        Ok(())
    }
}

#[test]
fn sandbox_refusal_keeps_the_body_from_running() {
    let channel = SharedMemoryChannel::with_contents(&[9; 8]).unwrap();
    let mut dest = [0u8; 8];
    let err = spawn_isolated(&RecordingSandbox, Path::new("/refuse"), &channel, &mut dest, || {
        write_u64(&channel, 0, 0);
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, UdfError::ChildFailed { status: 3 }), "{err}");
    assert_eq!(dest, [9; 8]);
}

#[test]
fn body_errors_and_panics_are_distinct_exit_statuses() {
    let channel = SharedMemoryChannel::new(8).unwrap();
    let mut dest = [0u8; 8];

    let err = spawn_isolated(&Unconfined, Path::new(""), &channel, &mut dest, || {
        Err(UdfError::Interpreter("bad".to_string()))
    })
    .unwrap_err();
    assert!(matches!(err, UdfError::ChildFailed { status: 1 }), "{err}");

    let err = spawn_isolated(&Unconfined, Path::new(""), &channel, &mut dest, || {
        panic!("udf body panicked")
    })
    .unwrap_err();
    assert!(matches!(err, UdfError::ChildFailed { status: 101 }), "{err}");
}

#[test]
fn fatal_signals_are_reported() {
    let channel = SharedMemoryChannel::new(8).unwrap();
    let mut dest = [0u8; 8];
    let err = spawn_isolated(&Unconfined, Path::new(""), &channel, &mut dest, || {
        unsafe { libc::raise(libc::SIGKILL) };
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, UdfError::ChildSignaled { signal } if signal == libc::SIGKILL));
    assert!(err.is_child_fault());
}

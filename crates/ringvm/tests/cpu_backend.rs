//! Integration tests for the CPU backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringvm::cpu::{CpuDeviceContext, HelperDeviceContext};
use ringvm::prelude::*;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn cpu_vm(devices: usize) -> RingVm {
    init_tracing();
    let config = VmConfig::builder()
        .with_cpu_devices(devices)
        .with_timeout(Duration::from_secs(10))
        .build()
        .expect("valid config");
    RingVm::builder()
        .config(config)
        .build()
        .expect("Failed to create VM")
}

/// Compute work runs off the submitting thread and is reaped by polling.
#[test]
fn test_compute_runs_on_worker() {
    let vm = cpu_vm(1);
    let stream = vm.stream(StreamRole::Compute, DeviceKind::Cpu, 0).unwrap();
    let submitter = std::thread::current().id();
    let ran_elsewhere = Arc::new(AtomicUsize::new(0));

    let flag = Arc::clone(&ran_elsewhere);
    let id = vm
        .submit(
            &stream,
            InstructionPayload::launch(move || {
                if std::thread::current().id() != submitter {
                    flag.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }),
        )
        .unwrap();

    assert_eq!(vm.run_until_idle().unwrap(), vec![id]);
    assert_eq!(ran_elsewhere.load(Ordering::SeqCst), 1);
    vm.shutdown().expect("Failed to shutdown");
}

/// Work on every compute stream completes, in order per stream.
#[test]
fn test_many_streams_many_instructions() {
    let vm = cpu_vm(4);
    let counter = Arc::new(AtomicUsize::new(0));
    let streams = vm.streams(StreamRole::Compute, DeviceKind::Cpu).to_vec();
    assert_eq!(streams.len(), 4);

    let mut submitted = Vec::new();
    for round in 0..25 {
        for stream in &streams {
            let counter = Arc::clone(&counter);
            let id = vm
                .submit(
                    stream,
                    InstructionPayload::launch(move || {
                        counter.fetch_add(round, Ordering::Relaxed);
                        Ok(())
                    }),
                )
                .unwrap();
            submitted.push(id);
        }
    }

    let done = vm.run_until_idle().unwrap();
    assert_eq!(done.len(), submitted.len());
    assert_eq!(counter.load(Ordering::Relaxed), 4 * (0..25).sum::<usize>());

    let stats = vm.stats();
    assert_eq!(stats.completed, 100);
    for metrics in &stats.streams {
        assert_eq!(metrics.launched, 25);
        assert_eq!(metrics.in_flight(), 0);
    }
    vm.shutdown().unwrap();
}

/// A failing closure is reported once, when its instruction is reaped.
#[test]
fn test_failure_surfaces_on_poll() {
    let vm = cpu_vm(1);
    let stream = vm.stream(StreamRole::Compute, DeviceKind::Cpu, 0).unwrap();

    let bad = vm
        .submit(
            &stream,
            InstructionPayload::launch(|| Err(VmError::BackendError("division by zero".into()))),
        )
        .unwrap();
    vm.submit(&stream, InstructionPayload::Nop).unwrap();

    let err = vm.run_until_idle().unwrap_err();
    match err {
        VmError::InstructionFailed {
            instruction,
            reason,
        } => {
            assert_eq!(instruction, bad);
            assert!(reason.contains("division by zero"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let stats = vm.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(vm.in_flight(), 0);
}

/// Pinned host memory round trip through the helper stream.
#[test]
fn test_host_memory_lifecycle() {
    let vm = cpu_vm(1);
    let helper = vm.stream(StreamRole::HostMemory, DeviceKind::Cpu, 0).unwrap();
    let object = LogicalObjectId::local(42);

    vm.submit(&helper, InstructionPayload::MallocHost { object, size: 4096 })
        .unwrap();
    assert_eq!(vm.poll().completed.len(), 1);

    let memory = helper.device_ctx_as::<HelperDeviceContext>().unwrap().memory();
    assert!(memory.contains(object));
    memory
        .with_bytes_mut(object, |bytes| bytes.fill(0xAB))
        .unwrap();

    vm.submit(&helper, InstructionPayload::FreeHost { object })
        .unwrap();
    vm.run_until_idle().unwrap();
    assert!(memory.is_empty());

    let err = vm
        .submit(&helper, InstructionPayload::FreeHost { object })
        .unwrap_err();
    assert!(matches!(err, VmError::ObjectNotFound(id) if id == object));
}

/// Compute streams refuse host memory payloads at submit time.
#[test]
fn test_payload_routing() {
    let vm = cpu_vm(1);
    let compute = vm.stream(StreamRole::Compute, DeviceKind::Cpu, 0).unwrap();
    let err = vm
        .submit(
            &compute,
            InstructionPayload::MallocHost {
                object: LogicalObjectId::local(1),
                size: 8,
            },
        )
        .unwrap_err();
    assert!(matches!(err, VmError::UnsupportedInstruction { tag: "cpu", payload: "malloc_host" }));
    assert_eq!(vm.in_flight(), 0);
}

/// Shutdown drains queued work before joining the workers.
#[test]
fn test_shutdown_drains() {
    let vm = cpu_vm(2);
    let counter = Arc::new(AtomicUsize::new(0));
    for stream in vm.streams(StreamRole::Compute, DeviceKind::Cpu).to_vec() {
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            vm.submit(
                &stream,
                InstructionPayload::launch(move || {
                    std::thread::sleep(Duration::from_millis(1));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        }
    }

    let stream = vm.stream(StreamRole::Compute, DeviceKind::Cpu, 1).unwrap();
    vm.shutdown().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 20);

    // Handles outliving the VM still see every ticket completed.
    let ctx = stream.device_ctx_as::<CpuDeviceContext>().unwrap();
    assert_eq!(ctx.completed(), 10);
}

/// A payload may submit follow-up work while the VM is draining.
#[test]
fn test_chained_submit_during_drain() {
    init_tracing();
    let config = VmConfig::builder()
        .with_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let vm = Arc::new(RingVm::builder().config(config).build().unwrap());
    let compute = vm.stream(StreamRole::Compute, DeviceKind::Cpu, 0).unwrap();
    let barrier = vm.stream(StreamRole::Barrier, DeviceKind::Cpu, 0).unwrap();
    let chained = Arc::new(AtomicUsize::new(0));

    let handle = Arc::clone(&vm);
    let counter = Arc::clone(&chained);
    let first = vm
        .submit(
            &compute,
            InstructionPayload::launch(move || {
                std::thread::sleep(Duration::from_millis(5));
                handle.submit(&barrier, InstructionPayload::Nop)?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    let reaped = vm.run_until_idle().unwrap();
    assert_eq!(chained.load(Ordering::SeqCst), 1);
    assert_eq!(reaped.len(), 2);
    assert!(reaped.contains(&first));
    assert_eq!(vm.stats().completed, 2);

    // The payload and its captures are gone once its ticket completes.
    let vm = Arc::try_unwrap(vm).expect("payload released its handle");
    vm.shutdown().unwrap();
}

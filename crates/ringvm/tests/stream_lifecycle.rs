//! Stream and status buffer lifecycle through the public API.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ringvm::prelude::*;
use ringvm::cpu::HostDeviceContext;

fn cpu_thread_ctx() -> Arc<ThreadCtx> {
    ThreadCtx::new(0, Arc::new(default_registry()))
}

#[test]
fn test_logical_object_id_equality() {
    assert_eq!(LogicalObjectId::local(5), LogicalObjectId::local(5));
    assert_ne!(LogicalObjectId::local(5), LogicalObjectId::remote(5));
    assert_ne!(LogicalObjectId::local(5), LogicalObjectId::local(6));
    assert!(LogicalObjectId::local(5).same_value(&LogicalObjectId::remote(5)));
}

#[test]
fn test_stream_device_id_matches_handle() {
    let thread_ctx = cpu_thread_ctx();
    for id in [0, 1, 17] {
        let device = Device::cpu(id);
        let stream = Stream::new(&thread_ctx, Arc::clone(&device), StreamRole::Barrier).unwrap();
        assert_eq!(stream.device_id(), device.device_id());
    }
}

#[test]
fn test_unregistered_pair_is_configuration_error() {
    let thread_ctx = cpu_thread_ctx();
    for _ in 0..3 {
        let err = thread_ctx
            .add_stream(Device::new(DeviceKind::Cuda, 0), StreamRole::Compute)
            .unwrap_err();
        assert!(err.is_configuration_error());
    }
    assert_eq!(thread_ctx.stream_count(), 0);
}

#[test]
fn test_sync_host_stream_protocol() {
    let thread_ctx = cpu_thread_ctx();
    let stream = thread_ctx
        .add_stream(Device::cpu(0), StreamRole::Host2Device)
        .unwrap();

    let mut instr = Instruction::new(InstructionId::new(1), InstructionPayload::Nop);
    instr.attach_status(stream.init_instruction_status()).unwrap();
    stream.compute(&mut instr).unwrap();

    assert!(stream.query_instruction_status_done(instr.status().unwrap()));
    assert!(stream.poll(&mut instr).unwrap());
    stream.release(&mut instr).unwrap();
    assert_eq!(instr.stage(), InstructionStage::StatusDeleted);
}

#[test]
fn test_same_role_streams_are_independent() {
    let thread_ctx = cpu_thread_ctx();
    let a = thread_ctx
        .add_stream(Device::cpu(0), StreamRole::Barrier)
        .unwrap();
    let b = thread_ctx
        .add_stream(Device::cpu(0), StreamRole::Barrier)
        .unwrap();
    assert_eq!(a.stream_type().device_tag(), b.stream_type().device_tag());

    let status_a = a.init_instruction_status();
    let status_b = b.init_instruction_status();
    assert_eq!(status_a.stream_id(), a.id());
    assert_eq!(status_b.stream_id(), b.id());

    let mut scheduler = Scheduler::default();
    scheduler.submit(&a, InstructionPayload::Nop).unwrap();
    scheduler.run_until_idle().unwrap();

    let executed = |s: &Stream| s.device_ctx_as::<HostDeviceContext>().unwrap().executed();
    assert_eq!(executed(&a), 1);
    assert_eq!(executed(&b), 0);
}

/// A backend registered by the embedding application.
struct FlagContext {
    raised: AtomicBool,
}

impl DeviceContext for FlagContext {
    fn device_tag(&self) -> &'static str {
        "flag"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct FlagStreamType;

impl StreamType for FlagStreamType {
    fn device_tag(&self) -> &'static str {
        "flag"
    }

    fn init_device_context(&self, _stream: &Stream) -> Result<Option<Box<dyn DeviceContext>>> {
        Ok(Some(Box::new(FlagContext {
            raised: AtomicBool::new(false),
        })))
    }

    fn init_instruction_status(&self, stream: &Stream) -> InstructionStatusBuffer {
        InstructionStatusBuffer::new(stream.id())
    }

    fn delete_instruction_status(&self, _stream: &Stream, _status: InstructionStatusBuffer) {}

    fn query_instruction_status_done(&self, stream: &Stream, _status: &InstructionStatusBuffer) -> bool {
        stream
            .device_ctx_as::<FlagContext>()
            .map(|ctx| ctx.raised.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn compute(&self, _stream: &Stream, instruction: &mut Instruction) -> Result<()> {
        instruction.take_payload();
        Ok(())
    }

    fn make_stream_descriptor(&self, resource: &Resource, _machine_id: i64) -> StreamDescriptor {
        StreamDescriptor {
            device_tag: self.device_tag(),
            role: StreamRole::Compute,
            device_kind: DeviceKind::Cuda,
            num_machines: 1,
            num_streams_per_machine: resource.gpu_device_num,
            num_streams_per_thread: resource.gpu_device_num,
            start_global_device_id: 0,
        }
    }
}

fn flag_stream_type(_: StreamRole, _: DeviceKind) -> Box<dyn StreamType> {
    Box::new(FlagStreamType)
}

#[test]
fn test_custom_backend_registration() {
    let mut registry = default_registry();
    registry.register(StreamRole::Compute, DeviceKind::Cuda, flag_stream_type);

    let config = VmConfig::builder().with_gpu_devices(2).build().unwrap();
    let vm = RingVm::builder()
        .config(config)
        .registry(registry)
        .build()
        .unwrap();

    let streams = vm.streams(StreamRole::Compute, DeviceKind::Cuda);
    assert_eq!(streams.len(), 2);
    let stream = Arc::clone(&streams[1]);
    assert_eq!(stream.device_id(), 1);

    vm.submit(&stream, InstructionPayload::Nop).unwrap();
    assert!(vm.poll().is_empty());
    assert!(vm.poll().is_empty());

    stream
        .device_ctx_as::<FlagContext>()
        .unwrap()
        .raised
        .store(true, Ordering::Release);
    assert_eq!(vm.poll().completed.len(), 1);
    vm.shutdown().unwrap();
}

#[test]
fn test_config_from_json() {
    let config: VmConfig = serde_json::from_str(
        r#"{ "resource": { "cpu_device_num": 2 }, "poll": { "timeout_ms": 500 } }"#,
    )
    .unwrap();
    config.validate().unwrap();

    let vm = RingVm::builder().config(config).build().unwrap();
    assert_eq!(vm.streams(StreamRole::Compute, DeviceKind::Cpu).len(), 2);
    assert_eq!(vm.config().poll.spin_iterations, 128);
}

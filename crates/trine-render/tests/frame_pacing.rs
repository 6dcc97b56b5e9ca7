// SPDX-License-Identifier: CEPL-1.0
//! Drives `FramePacer` against an in-memory GPU that models fences, command
//! buffer ownership and swapchain generations, and panics on any ordering
//! violation a real driver would turn into undefined behaviour.

use std::collections::VecDeque;

use proptest::prelude::*;
use trine_render::{
    Acquired, FrameOutcome, FramePacer, FrameTarget, Presented, RenderError, RenderSize,
    SurfaceState,
};

const SIZE: RenderSize = RenderSize::new(800, 600);

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    Wait(usize),
    Acquire(usize),
    Reset(usize),
    Record(usize, u32),
    Submit(usize),
    Present(usize, u32),
    WaitIdle,
    Rebuild(RenderSize),
}

/// Handles for one swapchain generation: image, view, framebuffer per entry.
#[derive(Clone, Debug)]
struct Chain {
    generation: u32,
    images: Vec<(u64, u64, u64)>,
}

struct MockGpu {
    calls: Vec<Call>,
    fence_signaled: Vec<bool>,
    in_flight: Vec<bool>,
    acquire_script: VecDeque<Acquired>,
    present_script: VecDeque<Presented>,
    fail_submit: bool,
    image_count: u32,
    next_image: u32,
    chain: Chain,
    destroyed: Vec<u64>,
    next_handle: u64,
}

impl MockGpu {
    fn new(slots: usize, image_count: u32) -> Self {
        let mut gpu = Self {
            calls: Vec::new(),
            fence_signaled: vec![true; slots],
            in_flight: vec![false; slots],
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fail_submit: false,
            image_count,
            next_image: 0,
            chain: Chain {
                generation: 0,
                images: Vec::new(),
            },
            destroyed: Vec::new(),
            next_handle: 1,
        };
        gpu.chain = gpu.build_chain(0);
        gpu
    }

    fn build_chain(&mut self, generation: u32) -> Chain {
        let images = (0..self.image_count)
            .map(|_| {
                let h = self.next_handle;
                self.next_handle += 3;
                (h, h + 1, h + 2)
            })
            .collect();
        Chain { generation, images }
    }

    fn retire(&mut self, slot: usize) {
        if self.in_flight[slot] {
            self.in_flight[slot] = false;
            self.fence_signaled[slot] = true;
        }
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|&c| pred(c)).count()
    }

    fn rebuilds(&self) -> usize {
        self.count(|c| matches!(c, Call::Rebuild(_)))
    }

    fn gpu_work_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Acquire(_) | Call::Submit(_) | Call::Present(..)))
    }
}

impl FrameTarget for MockGpu {
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        self.calls.push(Call::Wait(slot));
        // the GPU eventually retires whatever this slot submitted
        self.retire(slot);
        assert!(self.fence_signaled[slot], "wait on a fence nobody will signal");
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, RenderError> {
        self.calls.push(Call::Acquire(slot));
        let scripted = self.acquire_script.pop_front();
        Ok(scripted.unwrap_or_else(|| {
            let index = self.next_image % self.image_count;
            self.next_image += 1;
            Acquired::Image {
                index,
                suboptimal: false,
            }
        }))
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        self.calls.push(Call::Reset(slot));
        assert!(self.fence_signaled[slot], "reset of a fence still in flight");
        self.fence_signaled[slot] = false;
        Ok(())
    }

    fn record(&mut self, slot: usize, image: u32) -> Result<(), RenderError> {
        self.calls.push(Call::Record(slot, image));
        assert!(!self.in_flight[slot], "command buffer re-recorded while GPU owns it");
        let (_, view, fb) = self.chain.images[image as usize];
        assert!(!self.destroyed.contains(&view) && !self.destroyed.contains(&fb));
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<(), RenderError> {
        self.calls.push(Call::Submit(slot));
        if self.fail_submit {
            return Err(RenderError::api("vkQueueSubmit", "ERROR_DEVICE_LOST"));
        }
        assert!(!self.fence_signaled[slot], "submit with a fence that was not reset");
        self.in_flight[slot] = true;
        Ok(())
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Presented, RenderError> {
        self.calls.push(Call::Present(slot, image));
        Ok(self.present_script.pop_front().unwrap_or(Presented::Done))
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.calls.push(Call::WaitIdle);
        for slot in 0..self.in_flight.len() {
            self.retire(slot);
        }
        Ok(())
    }

    fn rebuild_swapchain(&mut self, drawable: RenderSize) -> Result<(), RenderError> {
        self.calls.push(Call::Rebuild(drawable));
        assert!(!drawable.is_empty());
        assert!(
            self.in_flight.iter().all(|f| !f),
            "swapchain destroyed while frames are in flight"
        );
        // framebuffers, then views, then the images go with the swapchain
        let old = std::mem::take(&mut self.chain.images);
        self.destroyed.extend(old.iter().map(|&(_, _, fb)| fb));
        self.destroyed.extend(old.iter().map(|&(_, view, _)| view));
        self.destroyed.extend(old.iter().map(|&(img, _, _)| img));
        let generation = self.chain.generation + 1;
        self.chain = self.build_chain(generation);
        Ok(())
    }
}

/// Every `Record(s)` must be preceded by a `Wait(s)` that happened after the
/// slot's previous `Submit(s)`.
fn assert_fence_gates_reuse(calls: &[Call]) {
    let slots = calls
        .iter()
        .filter_map(|c| match c {
            Call::Wait(s) => Some(*s),
            _ => None,
        })
        .max()
        .map_or(0, |m| m + 1);
    let mut waited_since_submit = vec![true; slots];
    for call in calls {
        match *call {
            Call::Wait(s) => waited_since_submit[s] = true,
            Call::Submit(s) => waited_since_submit[s] = false,
            Call::Record(s, _) => assert!(waited_since_submit[s], "slot {s} reused unguarded"),
            _ => {}
        }
    }
}

#[test]
fn cursor_returns_home_after_n_frames() {
    for n in 1..=3 {
        let mut gpu = MockGpu::new(n, 3);
        let mut pacer = FramePacer::new(n);
        for i in 0..n {
            let out = pacer.tick(&mut gpu, SIZE).unwrap();
            assert_eq!(out, FrameOutcome::Presented { slot: i, image: i as u32 % 3 });
        }
        assert_eq!(pacer.cursor().current(), 0);
        assert_eq!(pacer.state(), SurfaceState::Valid);
    }
}

#[test]
fn per_frame_call_order() {
    let mut gpu = MockGpu::new(2, 3);
    let mut pacer = FramePacer::new(2);
    pacer.tick(&mut gpu, SIZE).unwrap();
    assert_eq!(
        gpu.calls,
        vec![
            Call::Wait(0),
            Call::Acquire(0),
            Call::Reset(0),
            Call::Record(0, 0),
            Call::Submit(0),
            Call::Present(0, 0),
        ]
    );
}

#[test]
fn out_of_date_acquire_skips_but_still_advances() {
    let mut gpu = MockGpu::new(2, 3);
    gpu.acquire_script.push_back(Acquired::OutOfDate);
    let mut pacer = FramePacer::new(2);

    assert_eq!(pacer.tick(&mut gpu, SIZE).unwrap(), FrameOutcome::Skipped);
    assert_eq!(pacer.cursor().current(), 1);
    assert_eq!(pacer.state(), SurfaceState::PendingRecreate);
    assert_eq!(gpu.calls, vec![Call::Wait(0), Call::Acquire(0)]);

    // next tick rebuilds under a drained device, then draws from slot 1
    let out = pacer.tick(&mut gpu, SIZE).unwrap();
    assert!(matches!(out, FrameOutcome::Presented { slot: 1, .. }));
    assert_eq!(&gpu.calls[2..4], &[Call::WaitIdle, Call::Rebuild(SIZE)]);
    assert_eq!(pacer.state(), SurfaceState::Valid);

    // slot 0's fence was never reset, so waiting on it again is fine
    pacer.tick(&mut gpu, SIZE).unwrap();
    assert_fence_gates_reuse(&gpu.calls);
}

#[test]
fn stale_present_and_suboptimal_acquire_schedule_recreation() {
    let mut gpu = MockGpu::new(2, 3);
    let mut pacer = FramePacer::new(2);

    gpu.present_script.push_back(Presented::Stale);
    assert!(matches!(pacer.tick(&mut gpu, SIZE).unwrap(), FrameOutcome::Presented { .. }));
    assert_eq!(pacer.state(), SurfaceState::PendingRecreate);
    pacer.tick(&mut gpu, SIZE).unwrap();
    assert_eq!(pacer.state(), SurfaceState::Valid);

    gpu.acquire_script.push_back(Acquired::Image {
        index: 2,
        suboptimal: true,
    });
    let out = pacer.tick(&mut gpu, SIZE).unwrap();
    assert_eq!(out, FrameOutcome::Presented { slot: 0, image: 2 });
    assert_eq!(pacer.state(), SurfaceState::PendingRecreate);
    assert_eq!(gpu.rebuilds(), 1);
}

#[test]
fn resize_flag_is_consumed_at_present() {
    let mut gpu = MockGpu::new(2, 3);
    let mut pacer = FramePacer::new(2);
    pacer.notify_resized();

    pacer.tick(&mut gpu, SIZE).unwrap();
    assert_eq!(pacer.state(), SurfaceState::PendingRecreate);

    let bigger = RenderSize::new(1024, 768);
    pacer.tick(&mut gpu, bigger).unwrap();
    assert!(gpu.calls.contains(&Call::Rebuild(bigger)));

    // flag was cleared, so steady state follows
    pacer.tick(&mut gpu, bigger).unwrap();
    assert_eq!(pacer.state(), SurfaceState::Valid);
    assert_eq!(gpu.rebuilds(), 1);
}

#[test]
fn back_to_back_recreation_leaves_one_live_chain() {
    let mut gpu = MockGpu::new(2, 3);
    let mut pacer = FramePacer::new(2);
    let first: Vec<_> = gpu.chain.images.clone();

    pacer.invalidate("resize");
    pacer.recreate(&mut gpu, SIZE).unwrap();
    pacer.invalidate("resize");
    pacer.recreate(&mut gpu, SIZE).unwrap();
    // already valid: no further work
    pacer.recreate(&mut gpu, SIZE).unwrap();

    assert_eq!(gpu.rebuilds(), 2);
    assert_eq!(gpu.chain.generation, 2);
    assert_eq!(gpu.chain.images.len(), 3);
    for (img, view, fb) in first {
        assert!(gpu.destroyed.contains(&img));
        assert!(gpu.destroyed.contains(&view));
        assert!(gpu.destroyed.contains(&fb));
    }
    for &(img, view, fb) in &gpu.chain.images {
        assert!(!gpu.destroyed.contains(&img));
        assert!(!gpu.destroyed.contains(&view));
        assert!(!gpu.destroyed.contains(&fb));
    }

    // frames after recreation only touch the live generation (asserted in record)
    for _ in 0..4 {
        pacer.tick(&mut gpu, SIZE).unwrap();
    }
}

#[test]
fn two_resize_events_before_a_frame_rebuild_once() {
    let mut gpu = MockGpu::new(2, 3);
    let mut pacer = FramePacer::new(2);
    pacer.notify_resized();
    pacer.notify_resized();
    for _ in 0..3 {
        pacer.tick(&mut gpu, SIZE).unwrap();
    }
    assert_eq!(gpu.rebuilds(), 1);
    assert_eq!(gpu.chain.generation, 1);
}

#[test]
fn minimized_window_issues_no_gpu_work_until_restored() {
    let mut gpu = MockGpu::new(2, 3);
    let mut pacer = FramePacer::new(2);
    pacer.tick(&mut gpu, SIZE).unwrap();
    let before = gpu.calls.len();

    pacer.notify_minimized();
    for _ in 0..5 {
        let out = pacer.tick(&mut gpu, RenderSize::ZERO).unwrap();
        assert_eq!(out, FrameOutcome::Minimized);
        assert_eq!(pacer.state(), SurfaceState::Minimized);
    }
    assert_eq!(gpu.calls.len(), before, "device touched while minimized");

    pacer.notify_restored();
    assert_eq!(pacer.state(), SurfaceState::PendingRecreate);
    let out = pacer.tick(&mut gpu, SIZE).unwrap();
    assert!(matches!(out, FrameOutcome::Presented { .. }));
    assert_eq!(pacer.state(), SurfaceState::Valid);
    assert_eq!(gpu.rebuilds(), 1);
}

#[test]
fn resize_while_minimized_counts_as_restore() {
    let mut gpu = MockGpu::new(2, 3);
    let mut pacer = FramePacer::new(2);
    pacer.tick(&mut gpu, SIZE).unwrap();

    pacer.notify_minimized();
    assert_eq!(pacer.tick(&mut gpu, RenderSize::ZERO).unwrap(), FrameOutcome::Minimized);
    assert_eq!(pacer.state(), SurfaceState::Minimized);

    pacer.notify_resized();
    assert_eq!(pacer.state(), SurfaceState::PendingRecreate);

    let out = pacer.tick(&mut gpu, SIZE).unwrap();
    assert!(matches!(out, FrameOutcome::Presented { .. }));
    assert_eq!(pacer.state(), SurfaceState::Valid);
    assert_eq!(gpu.rebuilds(), 1);

    // the resize was folded into the restore; no second rebuild follows
    pacer.tick(&mut gpu, SIZE).unwrap();
    assert_eq!(pacer.state(), SurfaceState::Valid);
    assert_eq!(gpu.rebuilds(), 1);
}

#[test]
fn zero_drawable_without_event_still_parks() {
    let mut gpu = MockGpu::new(2, 3);
    let mut pacer = FramePacer::new(2);
    assert_eq!(
        pacer.tick(&mut gpu, RenderSize::new(0, 600)).unwrap(),
        FrameOutcome::Minimized
    );
    assert_eq!(gpu.gpu_work_calls(), 0);

    // a restored drawable is enough to leave Minimized
    assert!(matches!(
        pacer.tick(&mut gpu, SIZE).unwrap(),
        FrameOutcome::Presented { .. }
    ));
}

#[test]
fn fatal_errors_propagate() {
    let mut gpu = MockGpu::new(2, 3);
    gpu.fail_submit = true;
    let mut pacer = FramePacer::new(2);
    let err = pacer.tick(&mut gpu, SIZE).unwrap_err();
    assert!(matches!(err, RenderError::Api { call: "vkQueueSubmit", .. }));
}

#[derive(Clone, Debug)]
enum Step {
    Frame { out_of_date: bool, suboptimal: bool, stale: bool },
    Resize,
    Minimize(u8),
    Restore,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        6 => (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(out_of_date, suboptimal, stale)| Step::Frame { out_of_date, suboptimal, stale }
        ),
        1 => Just(Step::Resize),
        1 => (1u8..4).prop_map(Step::Minimize),
        1 => Just(Step::Restore),
    ]
}

proptest! {
    #[test]
    fn slots_stay_exclusive_under_any_trace(
        slots in 1usize..4,
        steps in proptest::collection::vec(step(), 1..40),
    ) {
        let mut gpu = MockGpu::new(slots, 3);
        let mut pacer = FramePacer::new(slots);
        let mut drawn = 0usize;
        let mut drawable = SIZE;

        for s in steps {
            match s {
                Step::Frame { out_of_date, suboptimal, stale } => {
                    if out_of_date {
                        gpu.acquire_script.push_back(Acquired::OutOfDate);
                    } else if suboptimal {
                        gpu.acquire_script.push_back(Acquired::Image { index: 1, suboptimal });
                    }
                    if stale {
                        gpu.present_script.push_back(Presented::Stale);
                    }
                }
                Step::Resize => pacer.notify_resized(),
                Step::Minimize(polls) => {
                    pacer.notify_minimized();
                    let before = gpu.gpu_work_calls();
                    for _ in 0..polls {
                        prop_assert_eq!(
                            pacer.tick(&mut gpu, RenderSize::ZERO).unwrap(),
                            FrameOutcome::Minimized
                        );
                    }
                    prop_assert_eq!(gpu.gpu_work_calls(), before);
                    drawable = RenderSize::ZERO;
                    continue;
                }
                Step::Restore => {
                    pacer.notify_restored();
                    drawable = SIZE;
                }
            }
            if pacer.tick(&mut gpu, drawable).unwrap() != FrameOutcome::Minimized {
                drawn += 1;
            }
            prop_assert_eq!(pacer.cursor().current(), drawn % slots);
            // unconsumed scripts would leak into later steps
            gpu.acquire_script.clear();
            gpu.present_script.clear();
        }
        assert_fence_gates_reuse(&gpu.calls);
    }
}

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use frame_engine::{
    application_state::device::FixedDevice,
    engine_state::task_management::{
        config::SchedulerConfig,
        task::{BoxedTask, TaskCategory, TaskContext},
        task_pool::TaskPool,
        TaskScheduler,
    },
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scheduler() -> TaskScheduler {
    init_logging();
    TaskScheduler::new(&SchedulerConfig::default(), &FixedDevice::new(4)).unwrap()
}

fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for tasks");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn single_worker_pool_runs_in_submission_order() {
    init_logging();
    let order = Arc::new(Mutex::new(Vec::new()));
    let pool = TaskPool::new(TaskCategory::Small, 1, "fifo").unwrap();

    for index in 0..100 {
        let order = order.clone();
        pool.add_task(Box::new(move |_: &TaskContext| {
            order.lock().unwrap().push(index);
        }));
    }
    drop(pool);

    assert_eq!(*order.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn file_tasks_run_one_at_a_time_in_order() {
    let scheduler = scheduler();
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    for index in 0..20 {
        let (running, max_running, order) = (running.clone(), max_running.clone(), order.clone());
        scheduler.schedule_task(TaskCategory::File, move |context: &TaskContext| {
            assert_eq!(context.category(), TaskCategory::File);
            let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
            max_running.fetch_max(now_running, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            order.lock().unwrap().push(index);
            running.fetch_sub(1, Ordering::SeqCst);
        });
    }

    wait_until(|| order.lock().unwrap().len() == 20);
    wait_until(|| !scheduler.handle().is_file_task_running());
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
    assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
}

#[test]
fn file_tasks_from_many_threads_stay_single_flight() {
    let scheduler = scheduler();
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let submitters: Vec<_> = (0..8)
        .map(|submitter| {
            let handle = scheduler.handle();
            let (running, max_running, order) = (running.clone(), max_running.clone(), order.clone());
            thread::spawn(move || {
                for sequence in 0..25 {
                    let (running, max_running, order) =
                        (running.clone(), max_running.clone(), order.clone());
                    handle.schedule_task(TaskCategory::File, move |_: &TaskContext| {
                        let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_running.fetch_max(now_running, Ordering::SeqCst);
                        order.lock().unwrap().push((submitter, sequence));
                        running.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    wait_until(|| order.lock().unwrap().len() == 200);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);

    let order = order.lock().unwrap();
    for submitter in 0..8 {
        let sequences: Vec<_> = order
            .iter()
            .filter(|(from, _)| *from == submitter)
            .map(|(_, sequence)| *sequence)
            .collect();
        assert_eq!(sequences, (0..25).collect::<Vec<_>>());
    }
}

#[test]
fn main_thread_drain_waits_for_all_game_logic() {
    let scheduler = scheduler();
    let finished = Arc::new(AtomicUsize::new(0));

    for index in 0..32u64 {
        let finished = finished.clone();
        scheduler.schedule_task(TaskCategory::GameLogic, move |context: &TaskContext| {
            assert_eq!(context.category(), TaskCategory::GameLogic);
            thread::sleep(Duration::from_micros(100 * (index % 4)));
            finished.fetch_add(1, Ordering::SeqCst);
        });
    }

    let observed = Arc::new(AtomicUsize::new(0));
    let (finished_view, observed_view) = (finished.clone(), observed.clone());
    scheduler.schedule_task(TaskCategory::MainThread, move |_: &TaskContext| {
        observed_view.store(finished_view.load(Ordering::SeqCst), Ordering::SeqCst);
    });

    let drain = scheduler.execute_main_thread_tasks();
    assert_eq!(drain.executed, 1);
    assert_eq!(observed.load(Ordering::SeqCst), 32);
    assert_eq!(scheduler.handle().outstanding_game_logic_tasks(), 0);
}

#[test]
fn game_logic_scheduled_by_game_logic_is_part_of_the_same_barrier() {
    let scheduler = scheduler();
    let finished = Arc::new(AtomicUsize::new(0));

    let handle = scheduler.handle();
    let outer_finished = finished.clone();
    scheduler.schedule_task(TaskCategory::GameLogic, move |_: &TaskContext| {
        let inner_finished = outer_finished.clone();
        handle.schedule_task(TaskCategory::GameLogic, move |_: &TaskContext| {
            thread::sleep(Duration::from_millis(5));
            inner_finished.fetch_add(1, Ordering::SeqCst);
        });
        outer_finished.fetch_add(1, Ordering::SeqCst);
    });

    scheduler.execute_main_thread_tasks();
    assert_eq!(finished.load(Ordering::SeqCst), 2);
}

#[test]
fn panicking_game_logic_still_releases_the_barrier() {
    let scheduler = scheduler();
    scheduler.schedule_task(TaskCategory::GameLogic, |_: &TaskContext| {
        panic!("game logic failure");
    });

    let drain = scheduler.execute_main_thread_tasks();
    assert_eq!(drain.executed, 0);
    assert_eq!(scheduler.handle().outstanding_game_logic_tasks(), 0);
}

#[test]
fn main_thread_tasks_queued_during_a_drain_wait_for_the_next_frame() {
    let scheduler = scheduler();
    let handle = scheduler.handle();
    let ran = Arc::new(AtomicUsize::new(0));

    let ran_outer = ran.clone();
    scheduler.schedule_task(TaskCategory::MainThread, move |context: &TaskContext| {
        assert_eq!(context.category(), TaskCategory::MainThread);
        let ran_inner = ran_outer.clone();
        handle.schedule_task(TaskCategory::MainThread, move |_: &TaskContext| {
            ran_inner.fetch_add(1, Ordering::SeqCst);
        });
        ran_outer.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(scheduler.execute_main_thread_tasks().executed, 1);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.execute_main_thread_tasks().executed, 1);
    assert_eq!(ran.load(Ordering::SeqCst), 2);
}

#[test]
fn fan_in_completion_sees_every_result() {
    let scheduler = scheduler();
    let results = Arc::new(Mutex::new(Vec::new()));
    let seen_by_completion = Arc::new(AtomicUsize::new(usize::MAX));

    let tasks: Vec<BoxedTask> = (0..50)
        .map(|index| {
            let results = results.clone();
            Box::new(move |_: &TaskContext| {
                results.lock().unwrap().push(index);
            }) as BoxedTask
        })
        .collect();

    let (results_view, seen) = (results.clone(), seen_by_completion.clone());
    scheduler.schedule_tasks(TaskCategory::Large, tasks, move |_: &TaskContext| {
        seen.store(results_view.lock().unwrap().len(), Ordering::SeqCst);
    });

    wait_until(|| seen_by_completion.load(Ordering::SeqCst) != usize::MAX);
    assert_eq!(seen_by_completion.load(Ordering::SeqCst), 50);
}

#[test]
fn empty_fan_out_schedules_the_completion_immediately() {
    let scheduler = scheduler();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_view = ran.clone();

    scheduler.schedule_tasks(TaskCategory::MainThread, Vec::new(), move |_: &TaskContext| {
        ran_view.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(scheduler.execute_main_thread_tasks().executed, 1);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn game_logic_fan_in_completes_within_one_frame() {
    let scheduler = scheduler();
    let handle = scheduler.handle();
    let completed = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<BoxedTask> = (0..8)
        .map(|_| Box::new(|_: &TaskContext| thread::sleep(Duration::from_millis(1))) as BoxedTask)
        .collect();
    let completed_view = completed.clone();
    scheduler.schedule_tasks(TaskCategory::GameLogic, tasks, move |_: &TaskContext| {
        handle.schedule_task(TaskCategory::MainThread, move |_: &TaskContext| {
            completed_view.fetch_add(1, Ordering::SeqCst);
        });
    });

    let drain = scheduler.execute_main_thread_tasks();
    assert_eq!(drain.executed, 1);
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[test]
fn dropping_the_scheduler_drains_pool_work() {
    let scheduler = scheduler();
    let ran = Arc::new(AtomicUsize::new(0));

    for category in [TaskCategory::Small, TaskCategory::Large, TaskCategory::File] {
        for _ in 0..10 {
            let ran = ran.clone();
            scheduler.schedule_task(category, move |_: &TaskContext| {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
    }
    drop(scheduler);

    assert_eq!(ran.load(Ordering::SeqCst), 30);
}

#[test]
fn child_tasks_go_to_the_parent_pool() {
    let scheduler = scheduler();
    let categories = Arc::new(Mutex::new(Vec::new()));

    let parent_categories = categories.clone();
    scheduler.schedule_task(TaskCategory::Large, move |context: &TaskContext| {
        let child_categories = parent_categories.clone();
        assert!(context.schedule_child(move |child: &TaskContext| {
            child_categories.lock().unwrap().push(child.category());
        }));
    });

    wait_until(|| !categories.lock().unwrap().is_empty());
    assert_eq!(*categories.lock().unwrap(), vec![TaskCategory::Large]);
}

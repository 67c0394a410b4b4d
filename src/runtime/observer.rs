use crate::runtime::case::{Case, TaskInstance};
use crate::runtime::sla::Alert;

pub type TaskCallback = Box<dyn Fn(&TaskInstance) + Send + Sync>;
pub type CaseCallback = Box<dyn Fn(&Case) + Send + Sync>;
pub type AlertCallback = Box<dyn Fn(&Alert) + Send + Sync>;

/// Notification queued during a transition.
#[derive(Debug, Clone)]
pub enum Event {
    TaskReady(TaskInstance),
    TaskStarted(TaskInstance),
    TaskComplete(TaskInstance),
    TaskFailed(TaskInstance),
    CaseComplete(Case),
    CaseFailed(Case),
    Alert(Alert),
}

/// Registered callbacks, invoked in registration order.
#[derive(Default)]
pub struct Observers {
    task_ready: Vec<TaskCallback>,
    task_started: Vec<TaskCallback>,
    task_complete: Vec<TaskCallback>,
    task_failed: Vec<TaskCallback>,
    case_complete: Vec<CaseCallback>,
    case_failed: Vec<CaseCallback>,
    alert: Vec<AlertCallback>,
}

impl Observers {
    pub fn on_task_ready(&mut self, f: TaskCallback) {
        self.task_ready.push(f);
    }

    pub fn on_task_started(&mut self, f: TaskCallback) {
        self.task_started.push(f);
    }

    pub fn on_task_complete(&mut self, f: TaskCallback) {
        self.task_complete.push(f);
    }

    pub fn on_task_failed(&mut self, f: TaskCallback) {
        self.task_failed.push(f);
    }

    pub fn on_case_complete(&mut self, f: CaseCallback) {
        self.case_complete.push(f);
    }

    pub fn on_case_failed(&mut self, f: CaseCallback) {
        self.case_failed.push(f);
    }

    pub fn on_alert(&mut self, f: AlertCallback) {
        self.alert.push(f);
    }

    /// Runs on the calling thread; a slow callback delays the caller.
    pub fn dispatch(&self, events: Vec<Event>) {
        for event in events {
            match &event {
                Event::TaskReady(t) => self.task_ready.iter().for_each(|f| f(t)),
                Event::TaskStarted(t) => self.task_started.iter().for_each(|f| f(t)),
                Event::TaskComplete(t) => self.task_complete.iter().for_each(|f| f(t)),
                Event::TaskFailed(t) => self.task_failed.iter().for_each(|f| f(t)),
                Event::CaseComplete(c) => self.case_complete.iter().for_each(|f| f(c)),
                Event::CaseFailed(c) => self.case_failed.iter().for_each(|f| f(c)),
                Event::Alert(a) => self.alert.iter().for_each(|f| f(a)),
            }
        }
    }
}

//! taskflow-core
//!
//! Asynchronous task-processing pipeline for the task tracker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskId, TaskStatus, Task, Message, errors）
//! - **ports**: 抽象化レイヤー（StatusStore/TaskStore, Publisher/MessageSource, MessageHandler, WorkUnit, Clock, IdGenerator）
//! - **app**: Producer, ConsumerLoop, TaskProcessor, TaskService
//! - **impls**: InMemoryChannel / InMemoryTaskStore（開発用・テスト用）
//! - **config**, **observability**: 設定とログ

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

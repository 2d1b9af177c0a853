//! # Repository Module
//!
//! Database repository implementations for Caja.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  SqliteRegisterStore (caja-session)                                    │
//! │       │                                                                 │
//! │       │  db.registers().close(&update)                                 │
//! │       ▼                                                                 │
//! │  RegisterRepository                     SaleRepository                 │
//! │  ├── open(req)                          ├── record(req)                │
//! │  ├── get_by_id / get_open_for_branch    ├── void(register, sale)       │
//! │  ├── get_with_breakdown(id)             ├── list_for_register(id)      │
//! │  ├── close(update)  ← CAS on version    └── breakdown(id)              │
//! │  ├── list_closed(query)                                                │
//! │  ├── delete_closed(id)                                                 │
//! │  └── update_notes(id, notes)                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite: cash_registers, register_sales                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation is a conditional statement (`WHERE status = 'open'`,
//! `AND version = ?`). When it touches no row the repository re-reads the
//! register to report *why*: missing, wrong state, or stale.

pub mod register;
pub mod sale;

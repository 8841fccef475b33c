//! User-facing message catalogue.
//!
//! Handlers never build ad-hoc wording for the common failures; they pick one
//! of these so the frontend can rely on stable text. `MSG26` and `MSG95` keep
//! the catalogue numbers the clinic staff already know.

pub const MSG26: &str = "You do not have permission to perform this action";
pub const MSG95: &str = "Value must be a positive number";

pub const UNAUTHORIZED: &str = MSG26;
pub const INVALID_NUMBER: &str = MSG95;

pub const INVALID_CREDENTIALS: &str = "Username or password is incorrect";
pub const SESSION_EXPIRED: &str = "Session expired";
pub const ACCOUNT_DISABLED: &str = "Account is disabled";

pub const PATIENT_NOT_FOUND: &str = "Patient not found";
pub const DENTIST_NOT_FOUND: &str = "Dentist not found";
pub const ASSISTANT_NOT_FOUND: &str = "Assistant not found";
pub const USER_NOT_FOUND: &str = "User not found";
pub const PROCEDURE_NOT_FOUND: &str = "Procedure not found";
pub const APPOINTMENT_NOT_FOUND: &str = "Appointment not found";
pub const SCHEDULE_NOT_FOUND: &str = "Schedule not found";
pub const TREATMENT_RECORD_NOT_FOUND: &str = "Treatment record not found";
pub const PROGRESS_NOT_FOUND: &str = "Treatment progress not found";
pub const TASK_NOT_FOUND: &str = "Task not found";
pub const WARRANTY_CARD_NOT_FOUND: &str = "Warranty card not found";
pub const DISCOUNT_PROGRAM_NOT_FOUND: &str = "Discount program not found";
pub const INVOICE_NOT_FOUND: &str = "Invoice not found";
pub const TRANSACTION_NOT_FOUND: &str = "Financial transaction not found";
pub const NOTIFICATION_NOT_FOUND: &str = "Notification not found";

pub const DATE_IN_PAST: &str = "Date cannot be in the past";
pub const DATE_IN_FUTURE: &str = "Date cannot be in the future";
pub const END_BEFORE_START: &str = "End time must be after start time";
pub const DISCOUNT_EXCEEDS_SUBTOTAL: &str = "Discount cannot exceed the subtotal";
pub const INVALID_STATUS: &str = "Invalid status";
pub const INVALID_STATUS_TRANSITION: &str = "Status change is not allowed";
pub const INVALID_PAYMENT_METHOD: &str = "Invalid payment method";

pub const APPOINTMENT_OVERLAP: &str = "Dentist already has an appointment in this time range";
pub const APPOINTMENT_LOCKED: &str = "Completed or canceled appointments cannot be changed";
pub const SCHEDULE_DUPLICATE: &str = "A schedule already exists for this date and shift";
pub const SCHEDULE_NOT_PENDING: &str = "Only pending schedules can be changed";
pub const RECORD_LOCKED: &str = "Completed or canceled treatment records cannot be changed";
pub const RECORD_CANCELED: &str = "Treatment record is canceled";
pub const RECORD_NOT_COMPLETED: &str = "Treatment record is not completed";
pub const PROGRESS_LOCKED: &str = "Completed treatment progress cannot be changed";
pub const WARRANTY_EXISTS: &str = "Treatment record already has an active warranty card";
pub const WARRANTY_INACTIVE: &str = "Warranty card is already inactive";
pub const INVOICE_EXISTS: &str = "Treatment record already has an invoice";
pub const INVOICE_CLOSED: &str = "Invoice is already paid or canceled";
pub const INVOICE_HAS_PAYMENTS: &str = "Invoice with payments cannot be canceled";
pub const OVERPAYMENT: &str = "Payment exceeds the remaining amount";

pub const NOTIFY_APPOINTMENT_BOOKED: &str = "New appointment";
pub const NOTIFY_APPOINTMENT_CHANGED: &str = "Appointment updated";
pub const NOTIFY_APPOINTMENT_CANCELED: &str = "Appointment canceled";
pub const NOTIFY_SCHEDULE_SUBMITTED: &str = "Schedule awaiting approval";
pub const NOTIFY_SCHEDULE_DECIDED: &str = "Schedule reviewed";
pub const NOTIFY_TREATMENT_RECORD: &str = "Treatment record created";
pub const NOTIFY_TREATMENT_PROGRESS: &str = "Treatment progress updated";
pub const NOTIFY_TASK_ASSIGNED: &str = "New task assigned";
pub const NOTIFY_WARRANTY_CREATED: &str = "Warranty card issued";
pub const NOTIFY_WARRANTY_DEACTIVATED: &str = "Warranty card deactivated";
pub const NOTIFY_DISCOUNT_PROGRAM: &str = "New discount program";
pub const NOTIFY_INVOICE_CREATED: &str = "Invoice created";

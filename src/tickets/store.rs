use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use diesel::prelude::*;
use log::{debug, error};

use crate::core::bot::channels::MessageRef;
use crate::core::shared::error::{DeskError, DeskResult};
use crate::core::shared::schema::tickets;
use crate::core::shared::utils::DbPool;
use crate::tickets::{Category, NewTicket, Ticket, TicketId, TicketStatus};

/// Persistent ticket records. Every call is one short statement; nothing is cached.
pub trait TicketStore: Send + Sync {
    fn create(&self, ticket: &NewTicket) -> DeskResult<TicketId>;

    fn get(&self, id: TicketId) -> DeskResult<Ticket>;

    fn set_status(&self, id: TicketId, status: TicketStatus) -> DeskResult<()>;

    fn set_admin_surface_ref(&self, id: TicketId, surface: &MessageRef) -> DeskResult<()>;

    /// Newest first.
    fn list_by_submitter(&self, submitter_id: i64) -> DeskResult<Vec<Ticket>>;

    /// Oldest first; both bounds inclusive, compared on the calendar date only.
    fn list_by_category_and_date_range(
        &self,
        category: Category,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DeskResult<Vec<Ticket>>;
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tickets)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct TicketRow {
    id: i32,
    submitter_id: i64,
    submitter_handle: Option<String>,
    full_name: String,
    department: String,
    category: String,
    description: String,
    attachment_ref: Option<String>,
    status: String,
    created_at: NaiveDateTime,
    admin_chat_id: Option<i64>,
    admin_message_id: Option<i64>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = DeskError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let category = row.category.parse::<Category>().map_err(|e| {
            DeskError::Persistence(format!("ticket #{}: {e}", row.id))
        })?;
        let status = row.status.parse::<TicketStatus>().map_err(|e| {
            DeskError::Persistence(format!("ticket #{}: {e}", row.id))
        })?;
        let admin_surface_ref = match (row.admin_chat_id, row.admin_message_id) {
            (Some(chat_id), Some(message_id)) => Some(MessageRef {
                chat_id,
                message_id,
            }),
            _ => None,
        };

        Ok(Ticket {
            id: row.id,
            submitter_id: row.submitter_id,
            submitter_handle: row.submitter_handle,
            full_name: row.full_name,
            department: row.department,
            category,
            description: row.description,
            attachment_ref: row.attachment_ref,
            status,
            created_at: row.created_at,
            admin_surface_ref,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = tickets)]
struct NewTicketRow<'a> {
    submitter_id: i64,
    submitter_handle: Option<&'a str>,
    full_name: &'a str,
    department: &'a str,
    category: &'a str,
    description: &'a str,
    attachment_ref: Option<&'a str>,
    status: &'a str,
    created_at: NaiveDateTime,
}

impl<'a> From<&'a NewTicket> for NewTicketRow<'a> {
    fn from(ticket: &'a NewTicket) -> Self {
        Self {
            submitter_id: ticket.submitter_id,
            submitter_handle: ticket.submitter_handle.as_deref(),
            full_name: &ticket.full_name,
            department: &ticket.department,
            category: ticket.category.as_str(),
            description: &ticket.description,
            attachment_ref: ticket.attachment_ref.as_deref(),
            status: TicketStatus::New.as_str(),
            created_at: ticket.created_at,
        }
    }
}

fn rows_to_tickets(rows: Vec<TicketRow>) -> DeskResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

fn start_of(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

#[derive(Debug, Clone)]
pub struct DieselTicketStore {
    pool: DbPool,
}

impl DieselTicketStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl TicketStore for DieselTicketStore {
    fn create(&self, ticket: &NewTicket) -> DeskResult<TicketId> {
        let mut conn = self.pool.get()?;

        let id = diesel::insert_into(tickets::table)
            .values(NewTicketRow::from(ticket))
            .returning(tickets::id)
            .get_result::<TicketId>(&mut conn)
            .map_err(|e| {
                error!(
                    "Failed to insert ticket for submitter {}: {}",
                    ticket.submitter_id, e
                );
                DeskError::persistence(e)
            })?;

        debug!("Ticket #{} stored for submitter {}", id, ticket.submitter_id);
        Ok(id)
    }

    fn get(&self, id: TicketId) -> DeskResult<Ticket> {
        let mut conn = self.pool.get()?;

        let row = tickets::table
            .find(id)
            .select(TicketRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(DeskError::persistence)?
            .ok_or(DeskError::NotFound(id))?;

        Ticket::try_from(row)
    }

    fn set_status(&self, id: TicketId, status: TicketStatus) -> DeskResult<()> {
        let mut conn = self.pool.get()?;

        let updated = diesel::update(tickets::table.find(id))
            .set(tickets::status.eq(status.as_str()))
            .execute(&mut conn)
            .map_err(DeskError::persistence)?;

        if updated == 0 {
            return Err(DeskError::NotFound(id));
        }
        Ok(())
    }

    fn set_admin_surface_ref(&self, id: TicketId, surface: &MessageRef) -> DeskResult<()> {
        let mut conn = self.pool.get()?;

        let updated = diesel::update(tickets::table.find(id))
            .set((
                tickets::admin_chat_id.eq(Some(surface.chat_id)),
                tickets::admin_message_id.eq(Some(surface.message_id)),
            ))
            .execute(&mut conn)
            .map_err(DeskError::persistence)?;

        if updated == 0 {
            return Err(DeskError::NotFound(id));
        }
        Ok(())
    }

    fn list_by_submitter(&self, submitter_id: i64) -> DeskResult<Vec<Ticket>> {
        let mut conn = self.pool.get()?;

        let rows = tickets::table
            .filter(tickets::submitter_id.eq(submitter_id))
            .order((tickets::created_at.desc(), tickets::id.desc()))
            .select(TicketRow::as_select())
            .load(&mut conn)
            .map_err(DeskError::persistence)?;

        rows_to_tickets(rows)
    }

    fn list_by_category_and_date_range(
        &self,
        category: Category,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DeskResult<Vec<Ticket>> {
        let mut conn = self.pool.get()?;

        let mut query = tickets::table
            .filter(tickets::category.eq(category.as_str()))
            .into_boxed::<diesel::sqlite::Sqlite>();

        if start > NaiveDate::MIN {
            query = query.filter(tickets::created_at.ge(start_of(start)));
        }
        // no upper bound when the day after `end` is not representable
        if let Some(next_day) = end.checked_add_days(Days::new(1)) {
            query = query.filter(tickets::created_at.lt(start_of(next_day)));
        }

        let rows = query
            .order((tickets::created_at.asc(), tickets::id.asc()))
            .select(TicketRow::as_select())
            .load(&mut conn)
            .map_err(DeskError::persistence)?;

        rows_to_tickets(rows)
    }
}

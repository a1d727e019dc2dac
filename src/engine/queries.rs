use ulid::Ulid;

use crate::model::*;
use crate::pager::{PageResult, PageWindow};
use crate::store::ReservationQuery;

use super::conflict::validate_window;
use super::{Engine, EngineError, typed};

impl Engine {
    pub async fn get<T: Entity>(&self, id: Ulid) -> Result<T, EngineError> {
        Ok(self.occ().load::<T>(id).await?.into_inner())
    }

    pub async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        self.get(id).await
    }

    pub async fn get_equipment(&self, id: Ulid) -> Result<Equipment, EngineError> {
        self.get(id).await
    }

    pub async fn get_user(&self, id: Ulid) -> Result<User, EngineError> {
        self.get(id).await
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.get(id).await
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, EngineError> {
        typed(self.store.list(EntityKind::Room).await?)
    }

    pub async fn count(&self, kind: EntityKind) -> Result<u64, EngineError> {
        Ok(self.store.count(kind).await?)
    }

    pub async fn count_rooms(&self) -> Result<u64, EngineError> {
        self.count(EntityKind::Room).await
    }

    pub async fn total_pages(
        &self,
        kind: EntityKind,
        page_size: usize,
    ) -> Result<usize, EngineError> {
        let total = self.count(kind).await?;
        Ok(PageWindow::compute(total, page_size, 1)?.total_pages)
    }

    // ── Reservation listings ─────────────────────────────────
    // All ordered by window start, then id.

    pub async fn reservations_for_user(
        &self,
        user_id: Ulid,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.reservations_where(ReservationQuery {
            user_id: Some(user_id),
            ..Default::default()
        })
        .await
    }

    pub async fn reservations_for_room(
        &self,
        room_id: Ulid,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.reservations_where(ReservationQuery {
            room_id: Some(room_id),
            ..Default::default()
        })
        .await
    }

    pub async fn reservations_with_status(
        &self,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.reservations_where(ReservationQuery {
            status: Some(status),
            ..Default::default()
        })
        .await
    }

    /// Reservations of any status whose window overlaps `window`.
    pub async fn reservations_in_window(
        &self,
        window: Window,
    ) -> Result<Vec<Reservation>, EngineError> {
        validate_window(&window)?;
        let found = self
            .reservations_where(ReservationQuery {
                window: Some(window),
                ..Default::default()
            })
            .await?;
        Ok(found
            .into_iter()
            .filter(|r| r.window.overlaps(&window))
            .collect())
    }

    async fn reservations_where(
        &self,
        query: ReservationQuery,
    ) -> Result<Vec<Reservation>, EngineError> {
        Ok(self.store.query_reservations(&query).await?)
    }

    // ── Pagination ───────────────────────────────────────────

    /// One 1-based page of `kind`, ordered by id. Pages past the end are empty.
    pub async fn paginate(
        &self,
        kind: EntityKind,
        page: usize,
        page_size: usize,
    ) -> Result<PageResult<Record>, EngineError> {
        let total = self.count(kind).await?;
        let window = PageWindow::compute(total, page_size, page)?;
        let items = if window.is_empty() {
            Vec::new()
        } else {
            self.store.page(kind, window.offset(), window.len()).await?
        };
        Ok(PageResult::new(items, window))
    }

    pub async fn paginate_rooms(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<PageResult<Room>, EngineError> {
        let page = self.paginate(EntityKind::Room, page, page_size).await?;
        let window = page.window;
        Ok(PageResult::new(typed(page.items)?, window))
    }
}

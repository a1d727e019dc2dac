use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::conflict::{
    check_no_conflict, find_conflict, validate_name, validate_reason, validate_room,
    validate_window,
};
use super::{Engine, EngineError};

impl Engine {
    /// True iff no confirmed reservation on `room_id` overlaps `window`.
    pub async fn is_room_available(
        &self,
        room_id: Ulid,
        window: Window,
    ) -> Result<bool, EngineError> {
        validate_window(&window)?;
        self.occ().load::<Room>(room_id).await?;
        let existing = self
            .store
            .query_confirmed_reservations(Some(room_id), Some(window))
            .await?;
        Ok(find_conflict(&existing, &window, None).is_none())
    }

    async fn check_room_free(
        &self,
        room_id: Ulid,
        window: &Window,
        ignore: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let existing = self
            .store
            .query_confirmed_reservations(Some(room_id), Some(*window))
            .await?;
        let result = check_no_conflict(room_id, &existing, window, ignore);
        if let Err(EngineError::Conflict { reservation_id, .. }) = &result {
            metrics::counter!(crate::observability::AVAILABILITY_CONFLICTS_TOTAL).increment(1);
            info!(
                "room {room_id} unavailable for [{}, {}): held by reservation {reservation_id}",
                window.start(),
                window.end()
            );
        }
        result
    }

    // ── Reservation flow ─────────────────────────────────────

    /// Check the room is free, then insert the reservation.
    ///
    /// The check and the insert are two store calls. Two creates racing for
    /// overlapping windows on the same room can both pass the check; nothing
    /// serializes brand-new reservations against each other.
    pub async fn create_reservation(
        &self,
        request: ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        validate_window(&request.window)?;
        validate_reason(request.reason.as_deref())?;
        if request.status == ReservationStatus::Cancelled {
            return Err(EngineError::Validation(
                "a reservation cannot be created cancelled".into(),
            ));
        }
        self.require_reference::<Room>(request.room_id).await?;
        self.require_reference::<User>(request.user_id).await?;

        self.check_room_free(request.room_id, &request.window, None)
            .await?;

        let draft = Reservation {
            id: Ulid::nil(),
            room_id: request.room_id,
            user_id: request.user_id,
            window: request.window,
            reason: request.reason,
            status: request.status,
            version: 0,
        };
        let committed = self.occ().insert(draft).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            "reservation {} {:?} on room {} for [{}, {})",
            committed.id,
            committed.status,
            committed.room_id,
            committed.window.start(),
            committed.window.end()
        );
        Ok(committed)
    }

    /// Cancel through a conditional write. Cancelling an already-cancelled
    /// reservation returns it unchanged without writing.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let occ = self.occ();
        let loaded = occ.load::<Reservation>(id).await?;
        if loaded.value().status == ReservationStatus::Cancelled {
            return Ok(loaded.into_inner());
        }
        let committed = occ
            .commit(loaded.modify(|r| r.status = ReservationStatus::Cancelled))
            .await?;
        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!("reservation {id} cancelled (version {})", committed.version);
        Ok(committed)
    }

    /// Promote a pending reservation once its window is free.
    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let occ = self.occ();
        let loaded = occ.load::<Reservation>(id).await?;
        match loaded.value().status {
            ReservationStatus::Confirmed => return Ok(loaded.into_inner()),
            ReservationStatus::Cancelled => {
                return Err(EngineError::Validation(format!(
                    "reservation {id} is cancelled and cannot be confirmed"
                )));
            }
            ReservationStatus::Pending => {}
        }
        let room_id = loaded.value().room_id;
        let window = loaded.value().window;
        self.check_room_free(room_id, &window, Some(id)).await?;

        let committed = occ
            .commit(loaded.modify(|r| r.status = ReservationStatus::Confirmed))
            .await?;
        info!("reservation {id} confirmed on room {room_id}");
        Ok(committed)
    }

    /// Edit window and/or reason. A confirmed reservation that moves is
    /// re-checked against the room's other reservations.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        changes: ReservationChanges,
    ) -> Result<Reservation, EngineError> {
        if let Some(window) = &changes.window {
            validate_window(window)?;
        }
        if let Some(reason) = &changes.reason {
            validate_reason(reason.as_deref())?;
        }

        let occ = self.occ();
        let loaded = occ.load::<Reservation>(id).await?;
        let current = loaded.value();
        if current.status == ReservationStatus::Cancelled {
            return Err(EngineError::Validation(format!(
                "reservation {id} is cancelled and cannot be edited"
            )));
        }
        if let Some(window) = changes.window
            && window != current.window
            && current.status.blocks_room()
        {
            self.check_room_free(current.room_id, &window, Some(id))
                .await?;
        }

        let modified = loaded.modify(|r| {
            if let Some(window) = changes.window {
                r.window = window;
            }
            if let Some(reason) = changes.reason {
                r.reason = reason;
            }
        });
        let committed = occ.commit(modified).await?;
        info!("reservation {id} updated (version {})", committed.version);
        Ok(committed)
    }

    // ── Administration ───────────────────────────────────────

    pub async fn create_room(&self, new: NewRoom) -> Result<Room, EngineError> {
        let draft = Room {
            id: Ulid::nil(),
            name: new.name,
            capacity: new.capacity,
            building: new.building,
            floor: new.floor,
            number: new.number,
            description: new.description,
            equipment: new.equipment,
            version: 0,
        };
        validate_room(&draft)?;
        let room = self.occ().insert(draft).await?;
        info!("room {} ({}) created", room.id, room.name);
        Ok(room)
    }

    /// Read-modify-write a room. Fails with `VersionConflict` if another
    /// writer got there first.
    pub async fn update_room<F>(&self, id: Ulid, f: F) -> Result<Room, EngineError>
    where
        F: FnOnce(&mut Room) + Send,
    {
        let occ = self.occ();
        let modified = occ.load::<Room>(id).await?.try_modify(|room| {
            f(room);
            validate_room(room)
        })?;
        occ.commit(modified).await
    }

    pub async fn assign_equipment(
        &self,
        room_id: Ulid,
        equipment_id: Ulid,
    ) -> Result<Room, EngineError> {
        self.require_reference::<Equipment>(equipment_id).await?;
        self.update_room(room_id, |room| {
            room.equipment.insert(equipment_id);
        })
        .await
    }

    /// Delete a room and, with it, every reservation on it.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let occ = self.occ();
        let loaded = occ.load::<Room>(id).await?;
        occ.delete(loaded).await?;
        info!("room {id} deleted with its reservations");
        Ok(())
    }

    pub async fn create_equipment(&self, new: NewEquipment) -> Result<Equipment, EngineError> {
        validate_name("equipment name", &new.name)?;
        let draft = Equipment {
            id: Ulid::nil(),
            name: new.name,
            description: new.description,
            reference: new.reference,
            version: 0,
        };
        self.occ().insert(draft).await
    }

    pub async fn create_user(&self, new: NewUser) -> Result<User, EngineError> {
        validate_name("first name", &new.first_name)?;
        validate_name("last name", &new.last_name)?;
        let draft = User {
            id: Ulid::nil(),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            phone: new.phone,
            department: new.department,
            version: 0,
        };
        self.occ().insert(draft).await
    }

    /// Users keep their reservation history: a user who still owns
    /// reservations cannot be deleted.
    pub async fn delete_user(&self, id: Ulid) -> Result<(), EngineError> {
        let occ = self.occ();
        let loaded = occ.load::<User>(id).await?;
        occ.delete(loaded).await?;
        info!("user {id} deleted");
        Ok(())
    }
}

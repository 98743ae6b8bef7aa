use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::notebook::{GenerationStatus, Notebook, NotebookSummary, Source};
use crate::models::organization::{
    MemberWithProfile, MembershipSummary, Organization, OrganizationMember, OrganizationRole,
};
use crate::models::user::PublicUser;

use super::notebook_repository::{NotebookRepository, NotebookUpdate};
use super::organization_repository::{
    AddMemberOutcome, MemberMutationOutcome, OrganizationRepository,
};
use super::user_repository::UserRepository;

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, PublicUser>,
    organizations: HashMap<Uuid, Organization>,
    members: HashMap<Uuid, OrganizationMember>,
    notebooks: HashMap<Uuid, Notebook>,
    sources: HashMap<Uuid, Source>,
}

/// In-memory stand-in for the Postgres repositories. Every operation
/// runs under one mutex over the whole state, which makes each call
/// atomic and the sequence of calls linearizable, matching the
/// transaction guarantees the real store provides.
#[derive(Default)]
pub struct MemoryDb {
    state: Mutex<MemoryState>,
    /// When non-zero, the next N reads fail with a transient I/O error.
    pub fail_next_reads: AtomicU32,
}

impl MemoryDb {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_user(&self, email: &str, full_name: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().users.insert(
            id,
            PublicUser {
                id,
                email: email.to_string(),
                full_name: full_name.map(str::to_string),
            },
        );
        id
    }

    pub fn seed_member(&self, organization_id: Uuid, user_id: Uuid, role: OrganizationRole) -> Uuid {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::new_v4();
        self.state.lock().unwrap().members.insert(
            id,
            OrganizationMember {
                id,
                organization_id,
                user_id,
                role,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    fn read_failure(&self) -> Option<sqlx::Error> {
        let remaining = self.fail_next_reads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_reads.store(remaining - 1, Ordering::SeqCst);
            Some(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "simulated transient failure",
            )))
        } else {
            None
        }
    }

    fn member_of(state: &MemoryState, organization_id: Uuid, user_id: Uuid) -> Option<OrganizationRole> {
        state
            .members
            .values()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
            .map(|m| m.role)
    }

    fn visible(state: &MemoryState, caller: Uuid, notebook: &Notebook) -> bool {
        match notebook.organization_id {
            None => notebook.user_id == caller,
            Some(org_id) => Self::member_of(state, org_id, caller).is_some(),
        }
    }

    fn summaries(state: &MemoryState, mut notebooks: Vec<Notebook>) -> Vec<NotebookSummary> {
        notebooks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        notebooks
            .into_iter()
            .map(|n| {
                let source_count = state
                    .sources
                    .values()
                    .filter(|s| s.notebook_id == n.id)
                    .count() as i64;
                NotebookSummary {
                    id: n.id,
                    title: n.title,
                    description: n.description,
                    user_id: n.user_id,
                    organization_id: n.organization_id,
                    generation_status: n.generation_status,
                    created_at: n.created_at,
                    updated_at: n.updated_at,
                    source_count,
                }
            })
            .collect()
    }

    fn with_profile(state: &MemoryState, member: &OrganizationMember) -> MemberWithProfile {
        let user = state.users.get(&member.user_id);
        MemberWithProfile {
            id: member.id,
            organization_id: member.organization_id,
            user_id: member.user_id,
            role: member.role,
            created_at: member.created_at,
            updated_at: member.updated_at,
            user_email: user.map(|u| u.email.clone()).unwrap_or_default(),
            user_full_name: user.and_then(|u| u.full_name.clone()),
        }
    }

    fn admins(state: &MemoryState, organization_id: Uuid) -> Vec<Uuid> {
        state
            .members
            .values()
            .filter(|m| m.organization_id == organization_id && m.role == OrganizationRole::Admin)
            .map(|m| m.user_id)
            .collect()
    }
}

#[async_trait]
impl UserRepository for MemoryDb {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<PublicUser>, sqlx::Error> {
        if let Some(err) = self.read_failure() {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_public_user_by_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<PublicUser>, sqlx::Error> {
        if let Some(err) = self.read_failure() {
            return Err(err);
        }
        Ok(self.state.lock().unwrap().users.get(&user_id).cloned())
    }
}

#[async_trait]
impl OrganizationRepository for MemoryDb {
    async fn create_organization_with_admin(
        &self,
        name: &str,
        created_by: Uuid,
    ) -> Result<(Organization, OrganizationMember), sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        let organization = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_by,
            created_at: now,
            updated_at: now,
        };
        let member = OrganizationMember {
            id: Uuid::new_v4(),
            organization_id: organization.id,
            user_id: created_by,
            role: OrganizationRole::Admin,
            created_at: now,
            updated_at: now,
        };
        state.organizations.insert(organization.id, organization.clone());
        state.members.insert(member.id, member.clone());
        Ok((organization, member))
    }

    async fn update_organization_name(
        &self,
        acting: Uuid,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Option<Organization>, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        if Self::member_of(&state, organization_id, acting) != Some(OrganizationRole::Admin) {
            return Ok(None);
        }
        let Some(org) = state.organizations.get_mut(&organization_id) else {
            return Ok(None);
        };
        org.name = name.to_string();
        org.updated_at = OffsetDateTime::now_utc();
        Ok(Some(org.clone()))
    }

    async fn delete_organization(
        &self,
        acting: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Organization>, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        if Self::member_of(&state, organization_id, acting) != Some(OrganizationRole::Admin) {
            return Ok(None);
        }
        let Some(organization) = state.organizations.remove(&organization_id) else {
            return Ok(None);
        };
        state.members.retain(|_, m| m.organization_id != organization_id);
        let doomed: Vec<Uuid> = state
            .notebooks
            .values()
            .filter(|n| n.organization_id == Some(organization_id))
            .map(|n| n.id)
            .collect();
        state.sources.retain(|_, s| !doomed.contains(&s.notebook_id));
        state
            .notebooks
            .retain(|_, n| n.organization_id != Some(organization_id));
        Ok(Some(organization))
    }

    async fn find_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<OrganizationRole>, sqlx::Error> {
        if let Some(err) = self.read_failure() {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        Ok(Self::member_of(&state, organization_id, user_id))
    }

    async fn find_member_by_id(
        &self,
        member_id: Uuid,
    ) -> Result<Option<OrganizationMember>, sqlx::Error> {
        Ok(self.state.lock().unwrap().members.get(&member_id).cloned())
    }

    async fn list_memberships_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<MembershipSummary>, sqlx::Error> {
        if let Some(err) = self.read_failure() {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        let mut rows: Vec<MembershipSummary> = state
            .members
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                state.organizations.get(&m.organization_id).map(|org| {
                    let member_count = state
                        .members
                        .values()
                        .filter(|c| c.organization_id == org.id)
                        .count() as i64;
                    MembershipSummary {
                        organization: org.clone(),
                        role: m.role,
                        member_count,
                    }
                })
            })
            .collect();
        rows.sort_by(|a, b| b.organization.created_at.cmp(&a.organization.created_at));
        Ok(rows)
    }

    async fn list_members(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<MemberWithProfile>, sqlx::Error> {
        if let Some(err) = self.read_failure() {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        let mut rows: Vec<MemberWithProfile> = state
            .members
            .values()
            .filter(|m| m.organization_id == organization_id)
            .map(|m| Self::with_profile(&state, m))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn add_member(
        &self,
        acting: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
        role: OrganizationRole,
    ) -> Result<AddMemberOutcome, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        if Self::member_of(&state, organization_id, acting) != Some(OrganizationRole::Admin) {
            return Ok(AddMemberOutcome::NotAdmin);
        }
        if Self::member_of(&state, organization_id, user_id).is_some() {
            return Ok(AddMemberOutcome::AlreadyMember);
        }
        let now = OffsetDateTime::now_utc();
        let member = OrganizationMember {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            role,
            created_at: now,
            updated_at: now,
        };
        state.members.insert(member.id, member.clone());
        Ok(AddMemberOutcome::Added(Self::with_profile(&state, &member)))
    }

    async fn update_member_role(
        &self,
        acting: Uuid,
        member_id: Uuid,
        role: OrganizationRole,
    ) -> Result<MemberMutationOutcome, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let Some(target) = state.members.get(&member_id).cloned() else {
            return Ok(MemberMutationOutcome::NotFound);
        };
        let admins = Self::admins(&state, target.organization_id);
        if !admins.contains(&acting) {
            return Ok(MemberMutationOutcome::NotAdmin);
        }
        if target.role == OrganizationRole::Admin
            && role == OrganizationRole::Member
            && admins.len() == 1
        {
            return Ok(MemberMutationOutcome::LastAdmin);
        }
        let member = state.members.get_mut(&member_id).unwrap();
        member.role = role;
        member.updated_at = OffsetDateTime::now_utc();
        Ok(MemberMutationOutcome::Applied(member.clone()))
    }

    async fn remove_member(
        &self,
        acting: Uuid,
        member_id: Uuid,
    ) -> Result<MemberMutationOutcome, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let Some(target) = state.members.get(&member_id).cloned() else {
            return Ok(MemberMutationOutcome::NotFound);
        };
        let admins = Self::admins(&state, target.organization_id);
        if !admins.contains(&acting) {
            return Ok(MemberMutationOutcome::NotAdmin);
        }
        let members = state
            .members
            .values()
            .filter(|m| m.organization_id == target.organization_id)
            .count();
        if target.role == OrganizationRole::Admin && admins.len() == 1 && members > 1 {
            return Ok(MemberMutationOutcome::LastAdmin);
        }
        state.members.remove(&member_id);
        Ok(MemberMutationOutcome::Applied(target))
    }
}

#[async_trait]
impl NotebookRepository for MemoryDb {
    async fn create_notebook(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        title: &str,
        description: Option<&str>,
    ) -> Result<Option<Notebook>, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(org_id) = organization_id {
            if Self::member_of(&state, org_id, user_id).is_none() {
                return Ok(None);
            }
        }
        let now = OffsetDateTime::now_utc();
        let notebook = Notebook {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: description.map(str::to_string),
            user_id,
            organization_id,
            generation_status: GenerationStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.notebooks.insert(notebook.id, notebook.clone());
        Ok(Some(notebook))
    }

    async fn list_personal_notebooks(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<NotebookSummary>, sqlx::Error> {
        if let Some(err) = self.read_failure() {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        let rows: Vec<Notebook> = state
            .notebooks
            .values()
            .filter(|n| n.organization_id.is_none() && n.user_id == user_id)
            .cloned()
            .collect();
        Ok(Self::summaries(&state, rows))
    }

    async fn list_organization_notebooks(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<NotebookSummary>, sqlx::Error> {
        if let Some(err) = self.read_failure() {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        let rows: Vec<Notebook> = state
            .notebooks
            .values()
            .filter(|n| n.organization_id == Some(organization_id))
            .cloned()
            .collect();
        Ok(Self::summaries(&state, rows))
    }

    async fn find_notebook_for_caller(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
    ) -> Result<Option<Notebook>, sqlx::Error> {
        if let Some(err) = self.read_failure() {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .notebooks
            .get(&notebook_id)
            .filter(|n| Self::visible(&state, caller, n))
            .cloned())
    }

    async fn update_notebook(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
        update: NotebookUpdate<'_>,
    ) -> Result<Option<Notebook>, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.notebooks.get(&notebook_id).cloned() else {
            return Ok(None);
        };
        if !Self::visible(&state, caller, &existing) {
            return Ok(None);
        }
        let notebook = state.notebooks.get_mut(&notebook_id).unwrap();
        if let Some(title) = update.title {
            notebook.title = title.to_string();
        }
        if let Some(description) = update.description {
            notebook.description = description.map(str::to_string);
        }
        if let Some(status) = update.generation_status {
            notebook.generation_status = status;
        }
        notebook.updated_at = OffsetDateTime::now_utc();
        Ok(Some(notebook.clone()))
    }

    async fn delete_notebook(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
    ) -> Result<Option<Notebook>, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.notebooks.get(&notebook_id).cloned() else {
            return Ok(None);
        };
        if !Self::visible(&state, caller, &existing) {
            return Ok(None);
        }
        state.sources.retain(|_, s| s.notebook_id != notebook_id);
        state.notebooks.remove(&notebook_id);
        Ok(Some(existing))
    }

    async fn add_source(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
        title: &str,
    ) -> Result<Option<Source>, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let Some(notebook) = state.notebooks.get(&notebook_id).cloned() else {
            return Ok(None);
        };
        if !Self::visible(&state, caller, &notebook) {
            return Ok(None);
        }
        let source = Source {
            id: Uuid::new_v4(),
            notebook_id,
            title: title.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        state.sources.insert(source.id, source.clone());
        Ok(Some(source))
    }

    async fn remove_source(
        &self,
        caller: Uuid,
        source_id: Uuid,
    ) -> Result<Option<(Source, Notebook)>, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let Some(source) = state.sources.get(&source_id).cloned() else {
            return Ok(None);
        };
        let Some(notebook) = state.notebooks.get(&source.notebook_id).cloned() else {
            return Ok(None);
        };
        if !Self::visible(&state, caller, &notebook) {
            return Ok(None);
        }
        state.sources.remove(&source_id);
        Ok(Some((source, notebook)))
    }
}

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::organization::{
    MemberWithProfile, MembershipSummary, Organization, OrganizationMember, OrganizationRole,
};

/// Outcome of an add-member attempt. The uniqueness check and the acting
/// user's role check happen inside the same transaction as the insert.
#[derive(Debug)]
pub enum AddMemberOutcome {
    Added(MemberWithProfile),
    AlreadyMember,
    NotAdmin,
}

/// Outcome of a role change or removal addressed by membership row id.
/// `LastAdmin` reports the invariant guard: the mutation would have left
/// an organization with members but no admin, and nothing was changed.
#[derive(Debug)]
pub enum MemberMutationOutcome {
    Applied(OrganizationMember),
    NotFound,
    NotAdmin,
    LastAdmin,
}

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    /// Inserts the organization and the creator's admin membership as one
    /// transaction; an organization without an admin is never observable.
    async fn create_organization_with_admin(
        &self,
        name: &str,
        created_by: Uuid,
    ) -> Result<(Organization, OrganizationMember), sqlx::Error>;

    /// Renames the organization iff the acting user is currently an
    /// admin; the role predicate is part of the UPDATE statement.
    async fn update_organization_name(
        &self,
        acting: Uuid,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Option<Organization>, sqlx::Error>;

    /// Admin-only delete, cascading to memberships and to the
    /// organization's notebooks and sources. Returns the deleted row.
    async fn delete_organization(
        &self,
        acting: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Organization>, sqlx::Error>;

    /// Current role of a user in an organization, if any. The single
    /// lookup behind every authorization decision.
    async fn find_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<OrganizationRole>, sqlx::Error>;

    async fn find_member_by_id(
        &self,
        member_id: Uuid,
    ) -> Result<Option<OrganizationMember>, sqlx::Error>;

    /// The caller's organizations with their role and the member count,
    /// newest-created first.
    async fn list_memberships_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<MembershipSummary>, sqlx::Error>;

    /// Members of one organization with joined profile fields, newest
    /// first.
    async fn list_members(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<MemberWithProfile>, sqlx::Error>;

    async fn add_member(
        &self,
        acting: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
        role: OrganizationRole,
    ) -> Result<AddMemberOutcome, sqlx::Error>;

    async fn update_member_role(
        &self,
        acting: Uuid,
        member_id: Uuid,
        role: OrganizationRole,
    ) -> Result<MemberMutationOutcome, sqlx::Error>;

    async fn remove_member(
        &self,
        acting: Uuid,
        member_id: Uuid,
    ) -> Result<MemberMutationOutcome, sqlx::Error>;
}

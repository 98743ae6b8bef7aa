use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::organization::{
    MemberWithProfile, MembershipSummary, Organization, OrganizationMember, OrganizationRole,
};

use super::organization_repository::{
    AddMemberOutcome, MemberMutationOutcome, OrganizationRepository,
};

pub struct PostgresOrganizationRepository {
    pub pool: PgPool,
}

const MEMBER_COLUMNS: &str = "id, organization_id, user_id, role, created_at, updated_at";
const ORG_COLUMNS: &str = "id, name, created_by, created_at, updated_at";

impl PostgresOrganizationRepository {
    /// Locks every admin row of the organization for the rest of the
    /// transaction, so concurrent role changes serialize and the
    /// last-admin check cannot race.
    async fn lock_admins(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        organization_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT user_id
            FROM organization_members
            WHERE organization_id = $1 AND role = 'admin'
            FOR UPDATE
            "#,
        )
        .bind(organization_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.iter().map(|r| r.get("user_id")).collect())
    }

    async fn member_count(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        organization_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM organization_members WHERE organization_id = $1"#,
        )
        .bind(organization_id)
        .fetch_one(&mut **tx)
        .await
    }
}

#[async_trait]
impl OrganizationRepository for PostgresOrganizationRepository {
    async fn create_organization_with_admin(
        &self,
        name: &str,
        created_by: Uuid,
    ) -> Result<(Organization, OrganizationMember), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let organization = sqlx::query_as::<_, Organization>(&format!(
            r#"
            INSERT INTO organizations (id, name, created_by, created_at, updated_at)
            VALUES (gen_random_uuid(), $1, $2, now(), now())
            RETURNING {ORG_COLUMNS}
            "#
        ))
        .bind(name)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;

        let member = sqlx::query_as::<_, OrganizationMember>(&format!(
            r#"
            INSERT INTO organization_members (id, organization_id, user_id, role, created_at, updated_at)
            VALUES (gen_random_uuid(), $1, $2, 'admin', now(), now())
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(organization.id)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((organization, member))
    }

    async fn update_organization_name(
        &self,
        acting: Uuid,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Option<Organization>, sqlx::Error> {
        // Admin predicate inside the UPDATE: the role check and the
        // mutation are one statement.
        sqlx::query_as::<_, Organization>(&format!(
            r#"
            UPDATE organizations
            SET name = $2, updated_at = now()
            WHERE id = $1
              AND EXISTS (
                SELECT 1 FROM organization_members
                WHERE organization_id = $1 AND user_id = $3 AND role = 'admin'
              )
            RETURNING {ORG_COLUMNS}
            "#
        ))
        .bind(organization_id)
        .bind(name)
        .bind(acting)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_organization(
        &self,
        acting: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Organization>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let organization = sqlx::query_as::<_, Organization>(&format!(
            r#"
            SELECT {ORG_COLUMNS}
            FROM organizations
            WHERE id = $1
              AND EXISTS (
                SELECT 1 FROM organization_members
                WHERE organization_id = $1 AND user_id = $2 AND role = 'admin'
              )
            FOR UPDATE
            "#
        ))
        .bind(organization_id)
        .bind(acting)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(organization) = organization else {
            tx.rollback().await?;
            return Ok(None);
        };

        // Cascade: sources -> notebooks -> memberships -> organization.
        sqlx::query(
            r#"
            DELETE FROM sources
            WHERE notebook_id IN (SELECT id FROM notebooks WHERE organization_id = $1)
            "#,
        )
        .bind(organization_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(r#"DELETE FROM notebooks WHERE organization_id = $1"#)
            .bind(organization_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM organization_members WHERE organization_id = $1"#)
            .bind(organization_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM organizations WHERE id = $1"#)
            .bind(organization_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(organization))
    }

    async fn find_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<OrganizationRole>, sqlx::Error> {
        sqlx::query_scalar::<_, OrganizationRole>(
            r#"
            SELECT role FROM organization_members
            WHERE organization_id = $1 AND user_id = $2
            "#,
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_member_by_id(
        &self,
        member_id: Uuid,
    ) -> Result<Option<OrganizationMember>, sqlx::Error> {
        sqlx::query_as::<_, OrganizationMember>(&format!(
            r#"SELECT {MEMBER_COLUMNS} FROM organization_members WHERE id = $1"#
        ))
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_memberships_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<MembershipSummary>, sqlx::Error> {
        #[derive(sqlx::FromRow)]
        struct MembershipRow {
            id: Uuid,
            name: String,
            created_by: Uuid,
            created_at: time::OffsetDateTime,
            updated_at: time::OffsetDateTime,
            role: OrganizationRole,
            member_count: i64,
        }

        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT o.id,
                   o.name,
                   o.created_by,
                   o.created_at,
                   o.updated_at,
                   m.role,
                   (SELECT COUNT(*) FROM organization_members c
                    WHERE c.organization_id = o.id) AS member_count
            FROM organization_members m
            JOIN organizations o ON o.id = m.organization_id
            WHERE m.user_id = $1
            ORDER BY o.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| MembershipSummary {
                organization: Organization {
                    id: row.id,
                    name: row.name,
                    created_by: row.created_by,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                },
                role: row.role,
                member_count: row.member_count,
            })
            .collect())
    }

    async fn list_members(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<MemberWithProfile>, sqlx::Error> {
        sqlx::query_as::<_, MemberWithProfile>(
            r#"
            SELECT m.id,
                   m.organization_id,
                   m.user_id,
                   m.role,
                   m.created_at,
                   m.updated_at,
                   u.email AS user_email,
                   u.full_name AS user_full_name
            FROM organization_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.organization_id = $1
            ORDER BY m.created_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn add_member(
        &self,
        acting: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
        role: OrganizationRole,
    ) -> Result<AddMemberOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let acting_role = sqlx::query_scalar::<_, OrganizationRole>(
            r#"
            SELECT role FROM organization_members
            WHERE organization_id = $1 AND user_id = $2
            "#,
        )
        .bind(organization_id)
        .bind(acting)
        .fetch_optional(&mut *tx)
        .await?;

        if acting_role != Some(OrganizationRole::Admin) {
            tx.rollback().await?;
            return Ok(AddMemberOutcome::NotAdmin);
        }

        // The unique index on (organization_id, user_id) arbitrates
        // concurrent adds: exactly one insert wins.
        let inserted = sqlx::query_as::<_, OrganizationMember>(&format!(
            r#"
            INSERT INTO organization_members (id, organization_id, user_id, role, created_at, updated_at)
            VALUES (gen_random_uuid(), $1, $2, $3, now(), now())
            ON CONFLICT (organization_id, user_id) DO NOTHING
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(organization_id)
        .bind(user_id)
        .bind(role)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(member) = inserted else {
            tx.rollback().await?;
            return Ok(AddMemberOutcome::AlreadyMember);
        };

        let member = sqlx::query_as::<_, MemberWithProfile>(
            r#"
            SELECT m.id, m.organization_id, m.user_id, m.role, m.created_at, m.updated_at,
                   u.email AS user_email, u.full_name AS user_full_name
            FROM organization_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.id = $1
            "#,
        )
        .bind(member.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AddMemberOutcome::Added(member))
    }

    async fn update_member_role(
        &self,
        acting: Uuid,
        member_id: Uuid,
        role: OrganizationRole,
    ) -> Result<MemberMutationOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let target = sqlx::query_as::<_, OrganizationMember>(&format!(
            r#"SELECT {MEMBER_COLUMNS} FROM organization_members WHERE id = $1 FOR UPDATE"#
        ))
        .bind(member_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(target) = target else {
            tx.rollback().await?;
            return Ok(MemberMutationOutcome::NotFound);
        };

        let admins = Self::lock_admins(&mut tx, target.organization_id).await?;
        if !admins.contains(&acting) {
            tx.rollback().await?;
            return Ok(MemberMutationOutcome::NotAdmin);
        }

        // Demoting the only admin always strands at least one member
        // (the target themself) without an admin.
        if target.role == OrganizationRole::Admin
            && role == OrganizationRole::Member
            && admins.len() == 1
        {
            tx.rollback().await?;
            return Ok(MemberMutationOutcome::LastAdmin);
        }

        let updated = sqlx::query_as::<_, OrganizationMember>(&format!(
            r#"
            UPDATE organization_members
            SET role = $2, updated_at = now()
            WHERE id = $1
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(member_id)
        .bind(role)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MemberMutationOutcome::Applied(updated))
    }

    async fn remove_member(
        &self,
        acting: Uuid,
        member_id: Uuid,
    ) -> Result<MemberMutationOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let target = sqlx::query_as::<_, OrganizationMember>(&format!(
            r#"SELECT {MEMBER_COLUMNS} FROM organization_members WHERE id = $1 FOR UPDATE"#
        ))
        .bind(member_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(target) = target else {
            tx.rollback().await?;
            return Ok(MemberMutationOutcome::NotFound);
        };

        let admins = Self::lock_admins(&mut tx, target.organization_id).await?;
        if !admins.contains(&acting) {
            tx.rollback().await?;
            return Ok(MemberMutationOutcome::NotAdmin);
        }

        // Removing the only admin is refused while other members remain;
        // an admin leaving an otherwise empty organization is fine.
        let members = Self::member_count(&mut tx, target.organization_id).await?;
        if target.role == OrganizationRole::Admin && admins.len() == 1 && members > 1 {
            tx.rollback().await?;
            return Ok(MemberMutationOutcome::LastAdmin);
        }

        sqlx::query(r#"DELETE FROM organization_members WHERE id = $1"#)
            .bind(member_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(MemberMutationOutcome::Applied(target))
    }
}

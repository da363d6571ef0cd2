diesel::table! {
    funnels (id) {
        id -> Uuid,
        name -> Text,
        position -> Int4,
        is_active -> Bool,
        generates_contract -> Bool,
        contract_prompt -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    funnel_stages (id) {
        id -> Uuid,
        funnel_id -> Uuid,
        name -> Text,
        position -> Int4,
        sla_hours -> Nullable<Int4>,
        requires_proposal_value -> Bool,
        color -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    opportunities (id) {
        id -> Uuid,
        contact_id -> Uuid,
        funnel_id -> Uuid,
        stage_id -> Nullable<Uuid>,
        status -> Text,
        stage_entered_at -> Timestamptz,
        proposal_value -> Nullable<Float8>,
        converted_at -> Nullable<Timestamptz>,
        lost_reason_id -> Nullable<Uuid>,
        owner_id -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    opportunity_history (id) {
        id -> Uuid,
        opportunity_id -> Uuid,
        action -> Text,
        from_stage_id -> Nullable<Uuid>,
        to_stage_id -> Nullable<Uuid>,
        actor_id -> Nullable<Uuid>,
        note -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    notifications (id) {
        id -> Uuid,
        user_id -> Uuid,
        kind -> Text,
        title -> Text,
        message -> Text,
        link -> Text,
        is_read -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    contracts (id) {
        id -> Uuid,
        contact_id -> Uuid,
        opportunity_id -> Uuid,
        product_id -> Uuid,
        owner_id -> Uuid,
        value -> Float8,
        pbs -> Float8,
        status -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    lost_reasons (id) {
        id -> Uuid,
        name -> Text,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    contacts (id) {
        id -> Uuid,
        full_name -> Text,
        email -> Nullable<Text>,
        phone -> Nullable<Text>,
        owner_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(funnel_stages -> funnels (funnel_id));
diesel::joinable!(opportunities -> funnels (funnel_id));
diesel::joinable!(opportunities -> contacts (contact_id));
diesel::joinable!(opportunity_history -> opportunities (opportunity_id));
diesel::joinable!(contracts -> opportunities (opportunity_id));
diesel::joinable!(contracts -> contacts (contact_id));

diesel::allow_tables_to_appear_in_same_query!(
    funnels,
    funnel_stages,
    opportunities,
    opportunity_history,
    notifications,
    contracts,
    lost_reasons,
    contacts,
);

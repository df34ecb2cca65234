table! {
    creations (creator_address) {
        creator_address -> Varchar,
        created_token -> Varchar,
        stream_id -> Int8,
        referral -> Nullable<Varchar>,
        created_at -> Int8,
        updated_at -> Int8,
        total_transfers -> Int8,
    }
}

table! {
    holders (holder_address, token_address) {
        holder_address -> Varchar,
        token_address -> Varchar,
        balance -> Text,
        updated_at -> Int8,
    }
}

table! {
    pairs (pair_address) {
        pair_address -> Varchar,
        token0 -> Varchar,
        token1 -> Varchar,
        reserve0 -> Text,
        reserve1 -> Text,
        price -> Text,
        updated_at -> Int8,
    }
}

table! {
    processed_blocks (block_number) {
        block_number -> Int8,
        processed_at -> Int8,
    }
}

table! {
    tracked_tokens (token_address) {
        token_address -> Varchar,
        creator_address -> Varchar,
        first_seen_block -> Int8,
    }
}

table! {
    rollup_deployments (l1_token, chain_id) {
        l1_token -> Varchar,
        chain_id -> Int8,
        l2_token -> Varchar,
        deployer -> Varchar,
        salt -> Varchar,
        created_at -> Int8,
    }
}

table! {
    rollup_processed_blocks (chain_id, block_number) {
        chain_id -> Int8,
        block_number -> Int8,
        processed_at -> Int8,
    }
}

table! {
    rollup_transfers (chain_id, tx_hash, from_address, to_address) {
        chain_id -> Int8,
        l2_token -> Varchar,
        from_address -> Varchar,
        to_address -> Varchar,
        amount -> Text,
        tx_hash -> Varchar,
        block_number -> Int8,
        block_timestamp -> Int8,
        created_at -> Int8,
    }
}

table! {
    rollup_holders (chain_id, l2_token, holder_address) {
        chain_id -> Int8,
        l2_token -> Varchar,
        holder_address -> Varchar,
        balance -> Text,
        updated_at -> Int8,
    }
}

allow_tables_to_appear_in_same_query!(
    creations,
    holders,
    pairs,
    processed_blocks,
    tracked_tokens,
    rollup_deployments,
    rollup_processed_blocks,
    rollup_transfers,
    rollup_holders,
);
